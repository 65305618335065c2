//! Outbound mail: `Mailer` trait and the SMTP implementation.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use super::EmailConfig;
use crate::error::MailError;

/// Sends follow-up emails. `Ok(())` means the message was accepted for delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// SMTP mailer built on lettre.
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn send_blocking(config: &EmailConfig, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| MailError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| MailError::InvalidAddress {
                        address: config.from_address.clone(),
                        reason: format!("{e}"),
                    })?,
            )
            .to(to.parse().map_err(|e| MailError::InvalidAddress {
                address: to.to_string(),
                reason: format!("{e}"),
            })?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MailError::SendFailed(format!("Failed to build email: {e}")))?;

        transport
            .send(&email)
            .map_err(|e| MailError::SendFailed(format!("SMTP send failed: {e}")))?;

        info!(to = to, "Follow-up email sent");
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let config = self.config.clone();
        let to = to.to_string();
        let subject = subject.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || Self::send_blocking(&config, &to, &subject, &body))
            .await
            .map_err(|e| MailError::SendFailed(format!("SMTP task panicked: {e}")))?
    }
}

/// Mailer used when no SMTP settings are present. Every send fails, so queued
/// follow-ups stay queued until mail is configured.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}
