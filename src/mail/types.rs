//! Inbound email value type and text helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound email, as handed to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Message-ID header, or a generated id when the header is missing.
    pub message_id: String,
    pub from_address: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub received_date: DateTime<Utc>,
}

impl EmailMessage {
    /// Domain part of the sender address, lowercased.
    pub fn sender_domain(&self) -> Option<String> {
        self.from_address
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim_end_matches('>').trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
    }
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop quoted reply lines and everything after an "On ... wrote:" attribution.
///
/// Keeps our own earlier follow-up text out of the classifier input.
pub fn strip_quoted_text(body: &str) -> String {
    let mut kept = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('>') {
            continue;
        }
        if (trimmed.starts_with("On ") && trimmed.ends_with("wrote:"))
            || trimmed.starts_with("-----Original Message-----")
        {
            break;
        }
        kept.push(line);
    }
    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    kept.join("\n")
}
