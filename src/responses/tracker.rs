//! Turns inbound employer email into recorded responses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::applications::{ApplicationFilter, ApplicationStatus};
use crate::classifier::{Classification, Classifier, ResponseCategory};
use crate::error::Error;
use crate::followup::state;
use crate::mail::{EmailMessage, Inbox};
use crate::responses::matcher::match_application;
use crate::store::{ApplicationStore, TrackedEmail};

/// What processing an email did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Message ID already processed; nothing changed.
    Duplicate,
    /// No application matched.
    Unmatched,
    /// Matched, but classified as `Other`.
    Ignored,
    /// Matched and recorded as a response.
    Responded { status: ApplicationStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedEmail {
    pub message_id: String,
    pub classification: Classification,
    pub application_id: Option<Uuid>,
    pub outcome: ProcessOutcome,
}

/// Counts from one inbox sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub duplicates: usize,
    pub matched: usize,
    pub responses: usize,
}

pub struct ResponseTracker {
    store: Arc<dyn ApplicationStore>,
    classifier: Classifier,
}

impl ResponseTracker {
    pub fn new(store: Arc<dyn ApplicationStore>, classifier: Classifier) -> Self {
        Self { store, classifier }
    }

    /// Classify one email, match it, and record it. Reprocessing the same
    /// message ID is a no-op.
    pub async fn process(
        &self,
        email: &EmailMessage,
        now: DateTime<Utc>,
    ) -> Result<ProcessedEmail, Error> {
        let classification = self.classifier.classify_message(email);

        if self.store.has_email(&email.message_id).await? {
            debug!(message_id = %email.message_id, "Email already processed");
            return Ok(ProcessedEmail {
                message_id: email.message_id.clone(),
                classification,
                application_id: None,
                outcome: ProcessOutcome::Duplicate,
            });
        }

        let apps = self
            .store
            .list_applications(&ApplicationFilter::all())
            .await?;

        let (application_id, outcome) = match match_application(email, &apps) {
            None => (None, ProcessOutcome::Unmatched),
            Some((app, _)) if classification.category == ResponseCategory::Other => {
                (Some(app.id), ProcessOutcome::Ignored)
            }
            Some((app, kind)) => {
                let update =
                    state::record_response(app, classification.category, email.received_date);
                let status = update.status.unwrap_or(app.status);
                self.store.update_application(app.id, &update).await?;
                info!(
                    id = %app.id,
                    company = %app.company,
                    category = %classification.category,
                    matched_by = ?kind,
                    status = %status,
                    "Response recorded"
                );
                (Some(app.id), ProcessOutcome::Responded { status })
            }
        };

        let tracked = TrackedEmail {
            message_id: email.message_id.clone(),
            application_id,
            from_address: email.from_address.clone(),
            subject: email.subject.clone(),
            category: classification.category,
            confidence: classification.confidence,
            action_required: classification.action_required,
            received_date: email.received_date,
            processed_at: now,
        };
        if !self.store.record_email(&tracked).await? {
            warn!(message_id = %email.message_id, "Email recorded concurrently");
        }

        Ok(ProcessedEmail {
            message_id: email.message_id.clone(),
            classification,
            application_id,
            outcome,
        })
    }

    /// Fetch unseen mail from `inbox` and process each message.
    pub async fn sync(&self, inbox: &dyn Inbox, now: DateTime<Utc>) -> Result<SyncReport, Error> {
        let messages = inbox.fetch_unseen().await?;
        let mut report = SyncReport {
            fetched: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            let processed = self.process(message, now).await?;
            match processed.outcome {
                ProcessOutcome::Duplicate => report.duplicates += 1,
                ProcessOutcome::Unmatched => {}
                ProcessOutcome::Ignored => report.matched += 1,
                ProcessOutcome::Responded { .. } => {
                    report.matched += 1;
                    report.responses += 1;
                }
            }
        }

        info!(
            fetched = report.fetched,
            matched = report.matched,
            responses = report.responses,
            "Inbox sync complete"
        );
        Ok(report)
    }
}
