//! Job application tracker: reply classification and follow-up scheduling.

pub mod api;
pub mod applications;
pub mod classifier;
pub mod config;
pub mod error;
pub mod followup;
pub mod mail;
pub mod responses;
pub mod store;

pub use error::{Error, Result};
