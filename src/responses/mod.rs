//! Response tracking: inbound employer mail matched to applications.

pub mod matcher;
pub mod tracker;

pub use matcher::{MatchKind, match_application};
pub use tracker::{ProcessOutcome, ProcessedEmail, ResponseTracker, SyncReport};
