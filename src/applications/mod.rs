//! Job applications: the persisted record the tracker revolves around.

pub mod model;

pub use model::{Application, ApplicationFilter, ApplicationStatus, ApplicationUpdate};
