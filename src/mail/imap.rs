//! Inbound mail: `Inbox` trait and a minimal IMAP-over-TLS reader.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::EmailConfig;
use super::types::{EmailMessage, strip_html, strip_quoted_text};
use crate::error::MailError;

/// Source of unread employer replies.
#[async_trait]
pub trait Inbox: Send + Sync {
    /// Fetch unseen messages and mark them seen.
    async fn fetch_unseen(&self) -> Result<Vec<EmailMessage>, MailError>;
}

/// IMAP inbox reader (blocking I/O, run on the blocking pool).
pub struct ImapInbox {
    config: EmailConfig,
}

impl ImapInbox {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Inbox for ImapInbox {
    async fn fetch_unseen(&self) -> Result<Vec<EmailMessage>, MailError> {
        let config = self.config.clone();
        let messages = tokio::task::spawn_blocking(move || fetch_unseen_imap(&config))
            .await
            .map_err(|e| MailError::FetchFailed(format!("IMAP task panicked: {e}")))?
            .map_err(|e| MailError::FetchFailed(e.to_string()))?;
        info!(count = messages.len(), "Fetched unseen emails");
        Ok(messages)
    }
}

type ImapError = Box<dyn std::error::Error + Send + Sync>;
type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn read_line(tls: &mut TlsStream) -> Result<String, ImapError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match tls.read(&mut byte) {
            Ok(0) => return Err("IMAP connection closed".into()),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn send_command(tls: &mut TlsStream, tag: &str, command: &str) -> Result<Vec<String>, ImapError> {
    tls.write_all(format!("{tag} {command}\r\n").as_bytes())?;
    tls.flush()?;
    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            return Ok(lines);
        }
    }
}

fn connect(config: &EmailConfig) -> Result<TlsStream, ImapError> {
    let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Message numbers from `* SEARCH` response lines.
pub(crate) fn parse_search_response(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| line.starts_with("* SEARCH"))
        .flat_map(|line| line.split_whitespace().skip(2).map(str::to_string))
        .collect()
}

fn fetch_unseen_imap(config: &EmailConfig) -> Result<Vec<EmailMessage>, ImapError> {
    let mut tls = connect(config)?;
    let _greeting = read_line(&mut tls)?;

    let login = send_command(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !login.last().is_some_and(|l| l.contains("OK")) {
        return Err("IMAP login failed".into());
    }

    send_command(&mut tls, "A2", &format!("SELECT \"{}\"", config.imap_folder))?;
    let ids = parse_search_response(&send_command(&mut tls, "A3", "SEARCH UNSEEN")?);
    debug!(count = ids.len(), "Unseen messages on server");

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;
    for id in &ids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let response = send_command(&mut tls, &fetch_tag, &format!("FETCH {id} RFC822"))?;

        // Drop the untagged header line and the trailing ")" + tagged status.
        let raw: String = response
            .iter()
            .skip(1)
            .take(response.len().saturating_sub(3))
            .cloned()
            .collect();

        match parse_raw_message(raw.as_bytes()) {
            Some(message) => results.push(message),
            None => warn!(id = %id, "Skipping unparseable message"),
        }

        let store_tag = format!("A{tag_counter}");
        tag_counter += 1;
        if let Err(e) = send_command(&mut tls, &store_tag, &format!("STORE {id} +FLAGS (\\Seen)")) {
            warn!(id = %id, "Failed to mark message seen: {e}");
        }
    }

    let logout_tag = format!("A{tag_counter}");
    let _ = send_command(&mut tls, &logout_tag, "LOGOUT");
    Ok(results)
}

/// Parse an RFC 822 message into an `EmailMessage`.
pub fn parse_raw_message(raw: &[u8]) -> Option<EmailMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from_address = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".into());
    let subject = parsed.subject().unwrap_or_default().to_string();
    let body = strip_quoted_text(&extract_text(&parsed));
    let message_id = parsed
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));
    let received_date = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Some(EmailMessage {
        message_id,
        from_address,
        subject,
        body,
        received_date,
    })
}

fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_lists_ids() {
        let lines = vec![
            "* SEARCH 3 7 12\r\n".to_string(),
            "A3 OK SEARCH completed\r\n".to_string(),
        ];
        assert_eq!(parse_search_response(&lines), vec!["3", "7", "12"]);
    }

    #[test]
    fn search_response_empty() {
        let lines = vec!["* SEARCH\r\n".to_string(), "A3 OK\r\n".to_string()];
        assert!(parse_search_response(&lines).is_empty());
    }

    #[test]
    fn parses_plain_text_message() {
        let raw = b"From: Jane Recruiter <jane@acme.com>\r\n\
Subject: Interview Invitation\r\n\
Message-ID: <abc123@acme.com>\r\n\
Date: Mon, 5 Jan 2026 10:30:00 +0000\r\n\
Content-Type: text/plain\r\n\
\r\n\
We'd like to schedule a call.\r\n\
\r\n\
On Fri, Jan 2, 2026 you wrote:\r\n\
> Just following up\r\n";

        let message = parse_raw_message(raw).expect("parses");
        assert_eq!(message.from_address, "jane@acme.com");
        assert_eq!(message.subject, "Interview Invitation");
        assert_eq!(message.message_id, "abc123@acme.com");
        assert_eq!(message.body.trim(), "We'd like to schedule a call.");
        assert_eq!(message.received_date.to_rfc3339(), "2026-01-05T10:30:00+00:00");
    }
}
