//! Follow-up lifecycle state machine.
//!
//! The follow-up columns on an application (`followup_sent`,
//! `follow_ups_sent`, `last_follow_up`, `next_follow_up_scheduled` and the
//! dispatch bookkeeping) are written only through the transition functions
//! here. Each returns a guarded [`ApplicationUpdate`] so a stale or
//! concurrent writer cannot apply the same transition twice.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::applications::{Application, ApplicationStatus, ApplicationUpdate};
use crate::classifier::ResponseCategory;
use crate::config::FollowUpConfig;
use crate::error::FollowUpError;
use crate::followup::policy::FollowUpReason;

/// Where an application sits in its follow-up lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpState {
    /// Nothing sent or queued yet.
    NotDue,
    /// Queued, waiting for dispatch.
    Queued,
    /// At least one follow-up delivered, more allowed.
    Sent,
    /// Cap reached.
    Exhausted,
    /// Response received or the application is finished.
    Closed,
}

impl FollowUpState {
    /// Derive the state from an application's stored flags.
    pub fn of(app: &Application, max_follow_ups: u32) -> Self {
        if app.response_received || app.status.closes_follow_ups() {
            Self::Closed
        } else if app.followup_sent {
            Self::Queued
        } else if app.follow_ups_sent >= max_follow_ups {
            Self::Exhausted
        } else if app.follow_ups_sent > 0 {
            Self::Sent
        } else {
            Self::NotDue
        }
    }

    pub fn can_transition_to(self, target: FollowUpState) -> bool {
        use FollowUpState::*;

        matches!(
            (self, target),
            (NotDue, Queued)
                | (Sent, Queued)
                | (Queued, Sent)
                | (Queued, Exhausted)
                // Failed send or dispatch claim keeps the follow-up queued.
                | (Queued, Queued)
                | (_, Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDue => "not_due",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Exhausted => "exhausted",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for FollowUpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of `app`, if it may move to `target`.
fn transition(
    app: &Application,
    config: &FollowUpConfig,
    target: FollowUpState,
) -> Result<FollowUpState, FollowUpError> {
    let from = FollowUpState::of(app, config.max_follow_ups);
    if from.can_transition_to(target) {
        Ok(from)
    } else {
        Err(invalid(app, config, target))
    }
}

fn invalid(app: &Application, config: &FollowUpConfig, target: FollowUpState) -> FollowUpError {
    FollowUpError::InvalidTransition {
        id: app.id,
        from: FollowUpState::of(app, config.max_follow_ups).to_string(),
        to: target.to_string(),
    }
}

/// `at + days`, saturating at the latest representable instant.
pub(crate) fn days_after(at: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// NotDue/Sent → Queued. Never touches `follow_ups_sent`.
pub fn queue(
    app: &Application,
    now: DateTime<Utc>,
    config: &FollowUpConfig,
) -> Result<ApplicationUpdate, FollowUpError> {
    if transition(app, config, FollowUpState::Queued)? == FollowUpState::Queued {
        return Err(invalid(app, config, FollowUpState::Queued));
    }

    Ok(ApplicationUpdate {
        followup_sent: Some(true),
        next_follow_up_scheduled: Some(Some(days_after(now, config.dispatch_buffer_days))),
        dispatch_attempts: Some(0),
        last_dispatch_error: Some(None),
        expect_followup_sent: Some(false),
        expect_response_received: Some(false),
        ..Default::default()
    })
}

/// Queued → Queued. Takes the dispatch lease on a due follow-up before it
/// is sent, pushing `next_follow_up_scheduled` out by the backoff base.
///
/// Guarded on the observed schedule, so of two concurrent dispatchers only
/// one wins the claim.
pub fn claim(
    app: &Application,
    now: DateTime<Utc>,
    config: &FollowUpConfig,
) -> Result<ApplicationUpdate, FollowUpError> {
    if transition(app, config, FollowUpState::Queued)? != FollowUpState::Queued {
        return Err(invalid(app, config, FollowUpState::Queued));
    }

    let lease = now
        .checked_add_signed(config.send_backoff_base)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    Ok(ApplicationUpdate {
        next_follow_up_scheduled: Some(Some(lease)),
        expect_followup_sent: Some(true),
        expect_follow_ups_sent: Some(app.follow_ups_sent),
        expect_next_follow_up_scheduled: Some(app.next_follow_up_scheduled),
        ..Default::default()
    })
}

/// Queued → Sent, or Exhausted when this delivery reaches the cap.
///
/// The only place `follow_ups_sent` is incremented. Guarded on the observed
/// counter so a duplicate call cannot count the same delivery twice.
pub fn mark_sent(
    app: &Application,
    now: DateTime<Utc>,
    config: &FollowUpConfig,
) -> Result<ApplicationUpdate, FollowUpReason> {
    let from = FollowUpState::of(app, config.max_follow_ups);
    if from == FollowUpState::Closed {
        return Err(if app.response_received {
            FollowUpReason::ResponseReceived
        } else {
            FollowUpReason::StatusNotAwaiting { status: app.status }
        });
    }
    if from == FollowUpState::Queued && app.follow_ups_sent >= config.max_follow_ups {
        return Err(FollowUpReason::MaxFollowUpsReached {
            sent: app.follow_ups_sent,
            max: config.max_follow_ups,
        });
    }

    let sent = app.follow_ups_sent + 1;
    let target = if sent < config.max_follow_ups {
        FollowUpState::Sent
    } else {
        FollowUpState::Exhausted
    };
    if !from.can_transition_to(target) {
        return Err(FollowUpReason::NotQueued);
    }

    let next = (target == FollowUpState::Sent)
        .then(|| days_after(now, config.retry_interval_days));
    Ok(ApplicationUpdate {
        follow_ups_sent: Some(sent),
        followup_sent: Some(false),
        last_follow_up: Some(Some(now)),
        next_follow_up_scheduled: Some(next),
        dispatch_attempts: Some(0),
        last_dispatch_error: Some(None),
        expect_followup_sent: Some(true),
        expect_follow_ups_sent: Some(app.follow_ups_sent),
        ..Default::default()
    })
}

/// Queued → Closed. Drops the queued follow-up without counting it.
pub fn cancel(
    app: &Application,
    config: &FollowUpConfig,
) -> Result<ApplicationUpdate, FollowUpError> {
    transition(app, config, FollowUpState::Closed)?;
    // Closing is valid from anywhere, but there must be a queue to drop.
    if !app.followup_sent {
        return Err(invalid(app, config, FollowUpState::Closed));
    }

    Ok(ApplicationUpdate {
        followup_sent: Some(false),
        next_follow_up_scheduled: Some(None),
        dispatch_attempts: Some(0),
        last_dispatch_error: Some(None),
        expect_followup_sent: Some(true),
        ..Default::default()
    })
}

/// Any state → Closed when an employer reply is classified.
///
/// Records the response, drops any queued follow-up and advances the status
/// when the funnel allows it.
pub fn record_response(
    app: &Application,
    category: ResponseCategory,
    received_at: DateTime<Utc>,
) -> ApplicationUpdate {
    let mut update = ApplicationUpdate {
        response_received: Some(true),
        response_date: Some(Some(received_at)),
        response_type: Some(Some(category)),
        ..Default::default()
    };
    if app.followup_sent {
        update.followup_sent = Some(false);
        update.next_follow_up_scheduled = Some(None);
        update.dispatch_attempts = Some(0);
        update.last_dispatch_error = Some(None);
    }
    if let Some(target) = ApplicationStatus::after_response(category)
        && app.status.can_transition_to(target)
    {
        update.status = Some(target);
    }
    update
}

/// Queued → Queued after a failed send. The counter is untouched; the next
/// attempt waits for the backoff delay.
pub fn defer_after_failure(
    app: &Application,
    now: DateTime<Utc>,
    error: &str,
    config: &FollowUpConfig,
) -> Result<ApplicationUpdate, FollowUpError> {
    if transition(app, config, FollowUpState::Queued)? != FollowUpState::Queued {
        return Err(invalid(app, config, FollowUpState::Queued));
    }

    let attempts = app.dispatch_attempts.saturating_add(1);
    let delay = backoff_delay(attempts, config.send_backoff_base, config.send_backoff_cap);
    Ok(ApplicationUpdate {
        next_follow_up_scheduled: Some(Some(
            now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
        )),
        dispatch_attempts: Some(attempts),
        last_dispatch_error: Some(Some(error.to_string())),
        expect_followup_sent: Some(true),
        expect_follow_ups_sent: Some(app.follow_ups_sent),
        ..Default::default()
    })
}

/// `base * 2^(attempts - 1)`, capped.
pub fn backoff_delay(attempts: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(30);
    let factor = 1i32 << exponent;
    base.checked_mul(factor).map_or(cap, |delay| delay.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FollowUpConfig {
        FollowUpConfig::default()
    }

    fn queued_app(sent: u32) -> Application {
        let mut app = Application::new("Acme", "Engineer", Utc::now() - Duration::days(30));
        app.follow_ups_sent = sent;
        app.followup_sent = true;
        app
    }

    #[test]
    fn state_derives_from_flags() {
        let mut app = Application::new("Acme", "Engineer", Utc::now());
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::NotDue);

        app.followup_sent = true;
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::Queued);

        app.followup_sent = false;
        app.follow_ups_sent = 1;
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::Sent);

        app.follow_ups_sent = 2;
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::Exhausted);

        app.response_received = true;
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::Closed);
    }

    #[test]
    fn offered_closes_follow_ups() {
        let app = Application::new("Acme", "Engineer", Utc::now())
            .with_status(ApplicationStatus::Offered);
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::Closed);
    }

    #[test]
    fn valid_transitions() {
        use FollowUpState::*;
        assert!(NotDue.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Queued));
        assert!(Closed.can_transition_to(Closed));
        assert!(Sent.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Sent));
        assert!(Queued.can_transition_to(Exhausted));
        assert!(Exhausted.can_transition_to(Closed));

        assert!(!NotDue.can_transition_to(Sent));
        assert!(!Exhausted.can_transition_to(Queued));
        assert!(!Closed.can_transition_to(Queued));
    }

    #[test]
    fn queue_sets_flag_and_buffer() {
        let now = Utc::now();
        let app = Application::new("Acme", "Engineer", now - Duration::days(10));
        let update = queue(&app, now, &config()).unwrap();
        assert_eq!(update.followup_sent, Some(true));
        assert_eq!(update.next_follow_up_scheduled, Some(Some(now + Duration::days(1))));
        assert_eq!(update.follow_ups_sent, None);
        assert_eq!(update.expect_followup_sent, Some(false));
    }

    #[test]
    fn mark_sent_below_cap_schedules_retry() {
        let now = Utc::now();
        let mut app = queued_app(0);
        let update = mark_sent(&app, now, &config()).unwrap();
        app.apply(&update);

        assert_eq!(app.follow_ups_sent, 1);
        assert!(!app.followup_sent);
        assert_eq!(app.last_follow_up, Some(now));
        assert_eq!(app.next_follow_up_scheduled, Some(now + Duration::days(14)));
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::Sent);
    }

    #[test]
    fn mark_sent_reaching_cap_clears_next() {
        let now = Utc::now();
        let mut app = queued_app(1);
        app.apply(&mark_sent(&app, now, &config()).unwrap());

        assert_eq!(app.follow_ups_sent, 2);
        assert!(!app.followup_sent);
        assert!(app.next_follow_up_scheduled.is_none());
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::Exhausted);
    }

    #[test]
    fn mark_sent_requires_queued_flag() {
        let mut app = queued_app(0);
        app.followup_sent = false;
        assert_eq!(
            mark_sent(&app, Utc::now(), &config()).unwrap_err(),
            FollowUpReason::NotQueued
        );
    }

    #[test]
    fn mark_sent_never_exceeds_cap() {
        let app = queued_app(2);
        assert!(matches!(
            mark_sent(&app, Utc::now(), &config()),
            Err(FollowUpReason::MaxFollowUpsReached { sent: 2, max: 2 })
        ));
    }

    #[test]
    fn mark_sent_guard_rejects_replay() {
        let now = Utc::now();
        let mut app = queued_app(0);
        let update = mark_sent(&app, now, &config()).unwrap();
        assert!(update.preconditions_hold(&app));
        app.apply(&update);
        assert!(!update.preconditions_hold(&app));
    }

    #[test]
    fn failure_keeps_queue_and_backs_off() {
        let now = Utc::now();
        let mut app = queued_app(0);

        app.apply(&defer_after_failure(&app, now, "smtp down", &config()).unwrap());
        assert!(app.followup_sent);
        assert_eq!(app.follow_ups_sent, 0);
        assert_eq!(app.dispatch_attempts, 1);
        assert_eq!(app.next_follow_up_scheduled, Some(now + Duration::hours(1)));
        assert_eq!(app.last_dispatch_error.as_deref(), Some("smtp down"));

        app.apply(&defer_after_failure(&app, now, "smtp down", &config()).unwrap());
        assert_eq!(app.next_follow_up_scheduled, Some(now + Duration::hours(2)));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::hours(1);
        let cap = Duration::hours(24);
        assert_eq!(backoff_delay(1, base, cap), Duration::hours(1));
        assert_eq!(backoff_delay(3, base, cap), Duration::hours(4));
        assert_eq!(backoff_delay(6, base, cap), Duration::hours(24));
        assert_eq!(backoff_delay(500, base, cap), cap);
    }

    #[test]
    fn response_closes_queue_and_advances_status() {
        let received = Utc::now();
        let mut app = queued_app(1);
        app.apply(&record_response(&app, ResponseCategory::Interview, received));

        assert!(app.response_received);
        assert_eq!(app.response_date, Some(received));
        assert_eq!(app.response_type, Some(ResponseCategory::Interview));
        assert_eq!(app.status, ApplicationStatus::Interviewing);
        assert!(!app.followup_sent);
        assert_eq!(app.follow_ups_sent, 1);
        assert_eq!(FollowUpState::of(&app, 2), FollowUpState::Closed);
    }

    #[test]
    fn response_never_moves_status_backwards() {
        let app = Application::new("Acme", "Engineer", Utc::now())
            .with_status(ApplicationStatus::Interviewing);
        let update = record_response(&app, ResponseCategory::InfoRequest, Utc::now());
        assert_eq!(update.status, None);
        assert_eq!(update.followup_sent, None);
    }

    #[test]
    fn cancel_clears_queue_without_counting() {
        let mut app = queued_app(1);
        app.next_follow_up_scheduled = Some(Utc::now());
        app.apply(&cancel(&app, &config()).unwrap());
        assert!(!app.followup_sent);
        assert_eq!(app.follow_ups_sent, 1);
        assert!(app.next_follow_up_scheduled.is_none());
    }

    #[test]
    fn queue_rejects_queued_exhausted_and_closed() {
        let now = Utc::now();
        let queued = queued_app(0);
        assert!(matches!(
            queue(&queued, now, &config()),
            Err(FollowUpError::InvalidTransition { ref from, .. }) if from == "queued"
        ));

        let mut exhausted = queued_app(2);
        exhausted.followup_sent = false;
        assert!(queue(&exhausted, now, &config()).is_err());

        let closed = Application::new("Acme", "Engineer", now - Duration::days(10))
            .with_status(ApplicationStatus::Rejected);
        assert!(queue(&closed, now, &config()).is_err());
    }

    #[test]
    fn dispatch_transitions_require_a_queue() {
        let now = Utc::now();
        let idle = Application::new("Acme", "Engineer", now - Duration::days(10));
        assert!(claim(&idle, now, &config()).is_err());
        assert!(cancel(&idle, &config()).is_err());
        assert!(defer_after_failure(&idle, now, "smtp down", &config()).is_err());
    }

    #[test]
    fn claim_is_guarded_on_observed_schedule() {
        let now = Utc::now();
        let mut app = queued_app(0);
        app.next_follow_up_scheduled = Some(now - Duration::minutes(5));

        let update = claim(&app, now, &config()).unwrap();
        assert_eq!(
            update.expect_next_follow_up_scheduled,
            Some(Some(now - Duration::minutes(5)))
        );
        assert!(update.preconditions_hold(&app));

        app.apply(&update);
        assert_eq!(app.next_follow_up_scheduled, Some(now + Duration::hours(1)));
        assert_eq!(app.follow_ups_sent, 0);
        assert!(!update.preconditions_hold(&app));
    }

    #[test]
    fn mark_sent_after_response_is_rejected() {
        let mut app = queued_app(0);
        app.response_received = true;
        assert_eq!(
            mark_sent(&app, Utc::now(), &config()).unwrap_err(),
            FollowUpReason::ResponseReceived
        );
    }

    #[test]
    fn days_after_saturates() {
        let now = Utc::now();
        assert_eq!(days_after(now, 14), now + Duration::days(14));
        assert_eq!(days_after(now, i64::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
