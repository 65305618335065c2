//! Storage trait: the tracker's only view of persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::applications::{Application, ApplicationFilter, ApplicationUpdate};
use crate::classifier::ResponseCategory;
use crate::error::DatabaseError;

/// A processed inbound email and what it was classified as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEmail {
    pub message_id: String,
    /// Matched application, if any.
    pub application_id: Option<Uuid>,
    pub from_address: String,
    pub subject: String,
    pub category: ResponseCategory,
    pub confidence: f64,
    pub action_required: bool,
    pub received_date: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

/// Backend-agnostic application store.
///
/// Every method is atomic per call. `update_application` only writes when the
/// patch's preconditions still hold on the stored row.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Applications ────────────────────────────────────────────────

    /// Insert a new application.
    async fn insert_application(&self, app: &Application) -> Result<(), DatabaseError>;

    /// Get an application by ID.
    async fn get_application(&self, id: Uuid) -> Result<Option<Application>, DatabaseError>;

    /// List applications matching `filter`, oldest application first.
    async fn list_applications(
        &self,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, DatabaseError>;

    /// Apply a guarded single-row update. Returns `false` when the row is
    /// missing or a precondition no longer holds.
    async fn update_application(
        &self,
        id: Uuid,
        update: &ApplicationUpdate,
    ) -> Result<bool, DatabaseError>;

    /// Apply several guarded updates in one transaction. Returns the ids of
    /// the rows that were written. Either all statements commit or none do.
    async fn update_applications(
        &self,
        updates: &[(Uuid, ApplicationUpdate)],
    ) -> Result<Vec<Uuid>, DatabaseError>;

    // ── Email tracking ──────────────────────────────────────────────

    /// Record a processed email. Returns `false` if the message ID was
    /// already recorded.
    async fn record_email(&self, email: &TrackedEmail) -> Result<bool, DatabaseError>;

    /// Whether a message ID has already been processed.
    async fn has_email(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// Emails matched to an application, most recent first.
    async fn list_emails(&self, application_id: Uuid) -> Result<Vec<TrackedEmail>, DatabaseError>;
}
