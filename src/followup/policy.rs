//! Follow-up eligibility policy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::applications::{Application, ApplicationStatus};
use crate::config::FollowUpConfig;
use crate::followup::state;

/// Why an application was or was not flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FollowUpReason {
    Due { days_since_applied: i64 },
    StatusNotAwaiting { status: ApplicationStatus },
    TooSoon { days_since_applied: i64, threshold_days: i64 },
    ResponseReceived,
    AlreadyQueued,
    MaxFollowUpsReached { sent: u32, max: u32 },
    RetryIntervalPending { next_eligible: DateTime<Utc> },
    NotQueued,
    NotFound,
}

impl std::fmt::Display for FollowUpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Due { days_since_applied } => {
                write!(f, "no response {days_since_applied} days after applying")
            }
            Self::StatusNotAwaiting { status } => {
                write!(f, "status is {status}, not awaiting a response")
            }
            Self::TooSoon {
                days_since_applied,
                threshold_days,
            } => write!(
                f,
                "applied {days_since_applied} days ago, follow-up due after {threshold_days}"
            ),
            Self::ResponseReceived => f.write_str("response already received"),
            Self::AlreadyQueued => f.write_str("follow-up already queued"),
            Self::MaxFollowUpsReached { sent, max } => {
                write!(f, "follow-up limit reached ({sent}/{max})")
            }
            Self::RetryIntervalPending { next_eligible } => {
                write!(f, "next follow-up not before {}", next_eligible.format("%Y-%m-%d"))
            }
            Self::NotQueued => f.write_str("no follow-up queued"),
            Self::NotFound => f.write_str("application not found"),
        }
    }
}

/// Policy output for one application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowUpDecision {
    pub application_id: Uuid,
    pub needs_followup: bool,
    pub reason: FollowUpReason,
}

impl FollowUpDecision {
    fn skip(app: &Application, reason: FollowUpReason) -> Self {
        Self {
            application_id: app.id,
            needs_followup: false,
            reason,
        }
    }
}

/// Decides whether an application should have a follow-up queued.
#[derive(Debug, Clone, Default)]
pub struct FollowUpPolicy {
    config: FollowUpConfig,
}

impl FollowUpPolicy {
    pub fn new(config: FollowUpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FollowUpConfig {
        &self.config
    }

    /// Pure eligibility check. All conditions must hold.
    pub fn check(&self, app: &Application, now: DateTime<Utc>) -> FollowUpDecision {
        if !app.status.is_awaiting_response() {
            return FollowUpDecision::skip(
                app,
                FollowUpReason::StatusNotAwaiting { status: app.status },
            );
        }

        let days_since_applied = app.days_since_applied(now);
        if days_since_applied < self.config.threshold_days {
            return FollowUpDecision::skip(
                app,
                FollowUpReason::TooSoon {
                    days_since_applied,
                    threshold_days: self.config.threshold_days,
                },
            );
        }
        if app.response_received {
            return FollowUpDecision::skip(app, FollowUpReason::ResponseReceived);
        }
        if app.followup_sent {
            return FollowUpDecision::skip(app, FollowUpReason::AlreadyQueued);
        }
        if app.follow_ups_sent >= self.config.max_follow_ups {
            return FollowUpDecision::skip(
                app,
                FollowUpReason::MaxFollowUpsReached {
                    sent: app.follow_ups_sent,
                    max: self.config.max_follow_ups,
                },
            );
        }
        if app.follow_ups_sent > 0
            && let Some(last) = app.last_follow_up
        {
            let next_eligible = state::days_after(last, self.config.retry_interval_days);
            if now < next_eligible {
                return FollowUpDecision::skip(
                    app,
                    FollowUpReason::RetryIntervalPending { next_eligible },
                );
            }
        }

        FollowUpDecision {
            application_id: app.id,
            needs_followup: true,
            reason: FollowUpReason::Due { days_since_applied },
        }
    }

    /// Check and, when eligible, queue the follow-up on the in-memory record.
    ///
    /// A second call on the same record returns `needs_followup = false`.
    pub fn evaluate(&self, app: &mut Application, now: DateTime<Utc>) -> FollowUpDecision {
        let decision = self.check(app, now);
        if !decision.needs_followup {
            return decision;
        }
        match state::queue(app, now, &self.config) {
            Ok(update) => {
                app.apply(&update);
                decision
            }
            Err(e) => {
                warn!(id = %app.id, error = %e, "Eligible application could not be queued");
                FollowUpDecision::skip(app, FollowUpReason::AlreadyQueued)
            }
        }
    }

    /// Decisions for every application, nothing mutated.
    pub fn scan(&self, apps: &[Application], now: DateTime<Utc>) -> Vec<FollowUpDecision> {
        apps.iter().map(|app| self.check(app, now)).collect()
    }
}

/// Stateless form of [`FollowUpPolicy::check`] with explicit thresholds.
pub fn evaluate(
    app: &Application,
    now: DateTime<Utc>,
    threshold_days: i64,
    max_follow_ups: u32,
) -> FollowUpDecision {
    FollowUpPolicy::new(FollowUpConfig {
        threshold_days,
        max_follow_ups,
        ..FollowUpConfig::default()
    })
    .check(app, now)
}
