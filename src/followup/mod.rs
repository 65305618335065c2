//! Follow-up lifecycle: eligibility policy, state machine and scheduler.

pub mod policy;
pub mod scheduler;
pub mod state;

pub use policy::{FollowUpDecision, FollowUpPolicy, FollowUpReason, evaluate};
pub use scheduler::{
    DispatchReport, FlaggedApplication, FollowUpScheduler, MarkSentOutcome, PolicyPassReport,
    TickReport, render_follow_up, spawn_scheduler,
};
pub use state::FollowUpState;
