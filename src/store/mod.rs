//! Persistence layer: application records and processed-email tracking.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ApplicationStore, TrackedEmail};
