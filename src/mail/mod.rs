//! Mail adapters: SMTP for follow-ups out, IMAP for employer replies in.

pub mod imap;
pub mod smtp;
pub mod types;

use secrecy::SecretString;

pub use imap::{ImapInbox, Inbox};
pub use smtp::{DisabledMailer, Mailer, SmtpMailer};
pub use types::EmailMessage;

/// Mail account settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_folder: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailConfig {
    /// Build config from the process environment.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (mail disabled).
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let imap_host = lookup("EMAIL_IMAP_HOST")?;

        let imap_port: u16 = lookup("EMAIL_IMAP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let imap_folder = lookup("EMAIL_IMAP_FOLDER").unwrap_or_else(|| "INBOX".to_string());

        let smtp_host =
            lookup("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = lookup("EMAIL_SMTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = lookup("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = lookup("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());

        Some(Self {
            imap_host,
            imap_port,
            imap_folder,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }
}
