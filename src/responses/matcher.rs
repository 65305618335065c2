//! Match an inbound email to the application it is about.

use regex::Regex;

use crate::applications::Application;
use crate::mail::EmailMessage;

/// Legal-form words ignored when comparing company names to domains.
const COMPANY_SUFFIXES: &[&str] = &[
    "inc", "corp", "corporation", "co", "company", "llc", "ltd", "limited", "gmbh", "plc",
];

/// How an email was tied to its application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    ContactAddress,
    SenderDomain,
    CompanyMention,
}

/// Find the application an email refers to.
///
/// Tried in order: exact contact address, sender domain against the company
/// name, company name mentioned in the subject or body. Terminal
/// applications never match. Within a tier the most recent application wins.
pub fn match_application<'a>(
    email: &EmailMessage,
    apps: &'a [Application],
) -> Option<(&'a Application, MatchKind)> {
    let live = || apps.iter().filter(|app| !app.status.is_terminal());
    let sender = bare_address(&email.from_address);

    if let Some(app) = latest(live().filter(|app| {
        app.contact_email
            .as_deref()
            .is_some_and(|contact| bare_address(contact) == sender)
    })) {
        return Some((app, MatchKind::ContactAddress));
    }

    if let Some(domain) = email.sender_domain()
        && let Some(app) = latest(live().filter(|app| domain_matches(&domain, &app.company)))
    {
        return Some((app, MatchKind::SenderDomain));
    }

    let text = format!("{} {}", email.subject, email.body);
    latest(live().filter(|app| mentions_company(&text, &app.company)))
        .map(|app| (app, MatchKind::CompanyMention))
}

fn latest<'a>(apps: impl Iterator<Item = &'a Application>) -> Option<&'a Application> {
    apps.max_by_key(|app| app.applied_date)
}

/// `"Jane Doe <Jane@Acme.com>"` → `"jane@acme.com"`.
fn bare_address(raw: &str) -> String {
    let raw = match (raw.find('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    raw.trim().to_lowercase()
}

/// Lowercase words of a company name, legal suffixes dropped.
fn company_words(company: &str) -> Vec<String> {
    company
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| !word.is_empty() && !COMPANY_SUFFIXES.contains(&word.as_str()))
        .collect()
}

/// Lowercase alphanumeric form of a company name without legal suffixes.
fn company_slug(company: &str) -> String {
    company_words(company).concat()
}

/// True when a non-TLD label of `domain` equals the company slug.
fn domain_matches(domain: &str, company: &str) -> bool {
    let slug = company_slug(company);
    if slug.len() < 2 {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels[..labels.len().saturating_sub(1)]
        .iter()
        .any(|label| label.replace('-', "") == slug)
}

/// Whole-word, case-insensitive mention of the company name. Punctuation
/// and legal suffixes in the stored name are not required in the text.
fn mentions_company(text: &str, company: &str) -> bool {
    let words = company_words(company);
    if words.is_empty() {
        return false;
    }
    let phrase = words
        .iter()
        .map(|word| regex::escape(word))
        .collect::<Vec<_>>()
        .join(r"\W+");
    Regex::new(&format!(r"(?i)\b{phrase}\b"))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
