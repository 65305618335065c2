//! Application record and status funnel.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::ResponseCategory;

/// Position of an application in the hiring funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Ready,
    Applied,
    Responded,
    Interviewing,
    Offered,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    /// Forward order of the funnel. `None` for the exit states.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Draft => Some(0),
            Self::Ready => Some(1),
            Self::Applied => Some(2),
            Self::Responded => Some(3),
            Self::Interviewing => Some(4),
            Self::Offered => Some(5),
            Self::Rejected | Self::Withdrawn => None,
        }
    }

    /// Rejected and Withdrawn end the lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Withdrawn)
    }

    /// Still waiting on the employer, so a follow-up makes sense.
    pub fn is_awaiting_response(self) -> bool {
        matches!(self, Self::Applied | Self::Ready)
    }

    /// No more follow-ups for these, whatever the counters say.
    pub fn closes_follow_ups(self) -> bool {
        matches!(self, Self::Rejected | Self::Withdrawn | Self::Offered)
    }

    /// Check if this status allows moving to `target`.
    ///
    /// Forward-only through the funnel; Rejected/Withdrawn reachable from any
    /// non-terminal status.
    pub fn can_transition_to(self, target: ApplicationStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if target.is_terminal() {
            return true;
        }
        match (self.rank(), target.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Applied => "applied",
            Self::Responded => "responded",
            Self::Interviewing => "interviewing",
            Self::Offered => "offered",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Status an application moves to when a response of `category` arrives.
    pub fn after_response(category: ResponseCategory) -> Option<ApplicationStatus> {
        match category {
            ResponseCategory::Interview => Some(Self::Interviewing),
            ResponseCategory::Offer => Some(Self::Offered),
            ResponseCategory::Rejection => Some(Self::Rejected),
            ResponseCategory::InfoRequest => Some(Self::Responded),
            ResponseCategory::Other => None,
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "applied" => Ok(Self::Applied),
            "responded" => Ok(Self::Responded),
            "interviewing" => Ok(Self::Interviewing),
            "offered" => Ok(Self::Offered),
            "rejected" => Ok(Self::Rejected),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(format!("unknown application status: {other}")),
        }
    }
}

/// A tracked job application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub company: String,
    pub position: String,
    /// Recruiter or hiring-manager address; follow-ups go here.
    pub contact_email: Option<String>,
    /// Set once at creation; no update path writes it.
    pub applied_date: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub response_received: bool,
    pub response_date: Option<DateTime<Utc>>,
    pub response_type: Option<ResponseCategory>,
    /// Delivered follow-ups. Only `mark_sent` increments it.
    pub follow_ups_sent: u32,
    /// A follow-up is queued but not yet dispatched.
    pub followup_sent: bool,
    pub last_follow_up: Option<DateTime<Utc>>,
    pub next_follow_up_scheduled: Option<DateTime<Utc>>,
    /// Consecutive failed sends of the queued follow-up.
    pub dispatch_attempts: u32,
    pub last_dispatch_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Create a new application in `Applied` status.
    pub fn new(
        company: impl Into<String>,
        position: impl Into<String>,
        applied_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company: company.into(),
            position: position.into(),
            contact_email: None,
            applied_date,
            status: ApplicationStatus::Applied,
            response_received: false,
            response_date: None,
            response_type: None,
            follow_ups_sent: 0,
            followup_sent: false,
            last_follow_up: None,
            next_follow_up_scheduled: None,
            dispatch_attempts: 0,
            last_dispatch_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the contact address.
    pub fn with_contact(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }

    /// Override the initial status.
    pub fn with_status(mut self, status: ApplicationStatus) -> Self {
        self.status = status;
        self
    }

    /// Whole days elapsed since the application went out.
    pub fn days_since_applied(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.applied_date).num_days()
    }

    /// Apply a field patch in memory, mirroring what the store does.
    pub fn apply(&mut self, update: &ApplicationUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(received) = update.response_received {
            self.response_received = received;
        }
        if let Some(date) = update.response_date {
            self.response_date = date;
        }
        if let Some(kind) = update.response_type {
            self.response_type = kind;
        }
        if let Some(count) = update.follow_ups_sent {
            self.follow_ups_sent = count;
        }
        if let Some(queued) = update.followup_sent {
            self.followup_sent = queued;
        }
        if let Some(last) = update.last_follow_up {
            self.last_follow_up = last;
        }
        if let Some(next) = update.next_follow_up_scheduled {
            self.next_follow_up_scheduled = next;
        }
        if let Some(attempts) = update.dispatch_attempts {
            self.dispatch_attempts = attempts;
        }
        if let Some(ref error) = update.last_dispatch_error {
            self.last_dispatch_error = error.clone();
        }
        if let Some(ref contact) = update.contact_email {
            self.contact_email = contact.clone();
        }
    }
}

/// Partial update for a single application row.
///
/// `None` leaves a column untouched; `Some(None)` clears a nullable column.
/// The `expect_*` fields are preconditions: the update only lands when the
/// stored row still matches them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationUpdate {
    pub status: Option<ApplicationStatus>,
    pub response_received: Option<bool>,
    pub response_date: Option<Option<DateTime<Utc>>>,
    pub response_type: Option<Option<ResponseCategory>>,
    pub follow_ups_sent: Option<u32>,
    pub followup_sent: Option<bool>,
    pub last_follow_up: Option<Option<DateTime<Utc>>>,
    pub next_follow_up_scheduled: Option<Option<DateTime<Utc>>>,
    pub dispatch_attempts: Option<u32>,
    pub last_dispatch_error: Option<Option<String>>,
    pub contact_email: Option<Option<String>>,

    pub expect_followup_sent: Option<bool>,
    pub expect_follow_ups_sent: Option<u32>,
    pub expect_response_received: Option<bool>,
    /// `Some(None)` expects the column to be NULL.
    pub expect_next_follow_up_scheduled: Option<Option<DateTime<Utc>>>,
}

impl ApplicationUpdate {
    /// True when the patch would not write any column.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.response_received.is_none()
            && self.response_date.is_none()
            && self.response_type.is_none()
            && self.follow_ups_sent.is_none()
            && self.followup_sent.is_none()
            && self.last_follow_up.is_none()
            && self.next_follow_up_scheduled.is_none()
            && self.dispatch_attempts.is_none()
            && self.last_dispatch_error.is_none()
            && self.contact_email.is_none()
    }

    /// Check the preconditions against an in-memory record.
    pub fn preconditions_hold(&self, app: &Application) -> bool {
        self.expect_followup_sent
            .is_none_or(|expected| app.followup_sent == expected)
            && self
                .expect_follow_ups_sent
                .is_none_or(|expected| app.follow_ups_sent == expected)
            && self
                .expect_response_received
                .is_none_or(|expected| app.response_received == expected)
            && self
                .expect_next_follow_up_scheduled
                .is_none_or(|expected| app.next_follow_up_scheduled == expected)
    }
}

/// Query filter for listing applications.
#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    /// Restrict to these statuses (empty = any).
    pub statuses: Vec<ApplicationStatus>,
    /// Restrict on the queued flag.
    pub followup_sent: Option<bool>,
    /// Restrict on the response flag.
    pub response_received: Option<bool>,
}

impl ApplicationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Applications with a follow-up waiting for dispatch.
    pub fn queued() -> Self {
        Self {
            followup_sent: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, app: &Application) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&app.status))
            && self.followup_sent.is_none_or(|v| app.followup_sent == v)
            && self
                .response_received
                .is_none_or(|v| app.response_received == v)
    }
}
