//! Error types for the job tracker.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Follow-up error: {0}")]
    FollowUp(#[from] FollowUpError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail adapter errors (outbound SMTP and inbound IMAP).
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail adapter is not configured")]
    NotConfigured,

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to send mail: {0}")]
    SendFailed(String),

    #[error("Failed to fetch mail: {0}")]
    FetchFailed(String),
}

/// Follow-up lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum FollowUpError {
    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Application {id} has no contact address for follow-up")]
    MissingContact { id: Uuid },

    #[error("Application {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },
}

/// Result type alias for the tracker.
pub type Result<T> = std::result::Result<T, Error>;
