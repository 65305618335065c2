//! Follow-up scheduler: policy passes, dispatch and the periodic ticker.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::applications::{Application, ApplicationFilter};
use crate::error::{Error, FollowUpError};
use crate::followup::policy::{FollowUpPolicy, FollowUpReason};
use crate::followup::state;
use crate::mail::{Inbox, Mailer};
use crate::responses::{ResponseTracker, SyncReport};
use crate::store::ApplicationStore;

/// An application the policy flagged for follow-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedApplication {
    pub application_id: Uuid,
    pub company: String,
    pub position: String,
    pub reason: String,
}

/// Result of one policy pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicyPassReport {
    pub checked: usize,
    pub flagged: Vec<FlaggedApplication>,
    pub dry_run: bool,
}

/// Result of one dispatch pass over queued follow-ups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Delivered and recorded.
    pub sent: usize,
    /// Dropped because a response arrived or the application closed.
    pub cancelled: usize,
    /// Queued but not yet due, or claimed by a concurrent pass.
    pub deferred: usize,
    /// Send failed; rescheduled with backoff.
    pub failed: usize,
}

/// Everything one scheduler tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub inbox: Option<SyncReport>,
    pub policy: PolicyPassReport,
    pub dispatch: DispatchReport,
}

/// Outcome of recording a delivered follow-up.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkSentOutcome {
    Sent(Box<Application>),
    NotEligible(FollowUpReason),
}

/// What dispatch did with one queued follow-up.
enum Dispatched {
    Sent,
    Cancelled,
    ClaimedElsewhere,
    Failed,
    Skipped,
}

struct InboxSync {
    tracker: Arc<ResponseTracker>,
    inbox: Arc<dyn Inbox>,
}

/// Drives the follow-up lifecycle against the store and the mailer.
pub struct FollowUpScheduler {
    store: Arc<dyn ApplicationStore>,
    mailer: Arc<dyn Mailer>,
    policy: FollowUpPolicy,
    inbox_sync: Option<InboxSync>,
}

impl FollowUpScheduler {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        mailer: Arc<dyn Mailer>,
        policy: FollowUpPolicy,
    ) -> Self {
        Self {
            store,
            mailer,
            policy,
            inbox_sync: None,
        }
    }

    /// Pull replies from `inbox` at the start of every tick.
    pub fn with_inbox_sync(mut self, tracker: Arc<ResponseTracker>, inbox: Arc<dyn Inbox>) -> Self {
        self.inbox_sync = Some(InboxSync { tracker, inbox });
        self
    }

    pub fn policy(&self) -> &FollowUpPolicy {
        &self.policy
    }

    /// Evaluate every application. In live mode all flags are written in a
    /// single transaction; a storage failure fails the whole pass.
    pub async fn run_policy_pass(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<PolicyPassReport, Error> {
        let apps = self
            .store
            .list_applications(&ApplicationFilter::all())
            .await?;

        let mut flagged: Vec<(&Application, FollowUpReason)> = apps
            .iter()
            .zip(self.policy.scan(&apps, now))
            .filter(|(_, decision)| decision.needs_followup)
            .map(|(app, decision)| (app, decision.reason))
            .collect();

        if !dry_run && !flagged.is_empty() {
            let updates: Vec<_> = flagged
                .iter()
                .filter_map(|(app, _)| match state::queue(app, now, self.policy.config()) {
                    Ok(update) => Some((app.id, update)),
                    Err(e) => {
                        warn!(id = %app.id, error = %e, "Skipping follow-up queue");
                        None
                    }
                })
                .collect();
            let written = self.store.update_applications(&updates).await?;
            if written.len() < flagged.len() {
                warn!(
                    flagged = flagged.len(),
                    written = written.len(),
                    "Some follow-ups were queued concurrently"
                );
                flagged.retain(|(app, _)| written.contains(&app.id));
            }
        }

        let report = PolicyPassReport {
            checked: apps.len(),
            flagged: flagged
                .into_iter()
                .map(|(app, reason)| FlaggedApplication {
                    application_id: app.id,
                    company: app.company.clone(),
                    position: app.position.clone(),
                    reason: reason.to_string(),
                })
                .collect(),
            dry_run,
        };

        info!(
            checked = report.checked,
            flagged = report.flagged.len(),
            dry_run,
            "Follow-up policy pass complete"
        );
        Ok(report)
    }

    /// Record a delivered follow-up. The only path that increments
    /// `follow_ups_sent`.
    pub async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<MarkSentOutcome, Error> {
        let Some(mut app) = self.store.get_application(id).await? else {
            return Ok(MarkSentOutcome::NotEligible(FollowUpReason::NotFound));
        };

        let update = match state::mark_sent(&app, now, self.policy.config()) {
            Ok(update) => update,
            Err(reason) => return Ok(MarkSentOutcome::NotEligible(reason)),
        };

        if !self.store.update_application(id, &update).await? {
            // Another writer recorded this delivery first.
            return Ok(MarkSentOutcome::NotEligible(FollowUpReason::NotQueued));
        }

        app.apply(&update);
        info!(
            id = %id,
            follow_ups_sent = app.follow_ups_sent,
            "Follow-up marked sent"
        );
        Ok(MarkSentOutcome::Sent(Box::new(app)))
    }

    /// Send every queued follow-up whose scheduled time has passed.
    ///
    /// Each follow-up is claimed with a guarded write before it is handed to
    /// the mailer, so overlapping passes send it at most once.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchReport, Error> {
        let queued = self
            .store
            .list_applications(&ApplicationFilter::queued())
            .await?;
        let mut report = DispatchReport::default();

        for app in queued {
            if app.next_follow_up_scheduled.is_some_and(|at| at > now) {
                report.deferred += 1;
                continue;
            }

            match self.dispatch_one(&app, now).await {
                Ok(Dispatched::Sent) => report.sent += 1,
                Ok(Dispatched::Cancelled) => report.cancelled += 1,
                Ok(Dispatched::ClaimedElsewhere) => report.deferred += 1,
                Ok(Dispatched::Failed) => report.failed += 1,
                Ok(Dispatched::Skipped) => {}
                // One bad row must not hold up the rest of the queue.
                Err(e) => {
                    error!(id = %app.id, error = %e, "Follow-up dispatch failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            sent = report.sent,
            cancelled = report.cancelled,
            deferred = report.deferred,
            failed = report.failed,
            "Follow-up dispatch complete"
        );
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        app: &Application,
        now: DateTime<Utc>,
    ) -> Result<Dispatched, Error> {
        let config = self.policy.config();

        if app.response_received
            || !app.status.is_awaiting_response()
            || app.follow_ups_sent >= config.max_follow_ups
        {
            if self
                .store
                .update_application(app.id, &state::cancel(app, config)?)
                .await?
            {
                info!(id = %app.id, status = %app.status, "Queued follow-up cancelled");
                return Ok(Dispatched::Cancelled);
            }
            return Ok(Dispatched::Skipped);
        }

        // Take the row before any mail goes out; a concurrent pass loses here.
        if !self
            .store
            .update_application(app.id, &state::claim(app, now, config)?)
            .await?
        {
            debug!(id = %app.id, "Follow-up claimed by another dispatcher");
            return Ok(Dispatched::ClaimedElsewhere);
        }

        let Some(to) = app.contact_email.as_deref() else {
            let err = FollowUpError::MissingContact { id: app.id };
            warn!(id = %app.id, "{err}");
            self.store
                .update_application(
                    app.id,
                    &state::defer_after_failure(app, now, &err.to_string(), config)?,
                )
                .await?;
            return Ok(Dispatched::Failed);
        };

        let (subject, body) = render_follow_up(app);
        if let Err(e) = self.mailer.send(to, &subject, &body).await {
            warn!(
                id = %app.id,
                attempts = app.dispatch_attempts + 1,
                error = %e,
                "Follow-up send failed, backing off"
            );
            self.store
                .update_application(
                    app.id,
                    &state::defer_after_failure(app, now, &e.to_string(), config)?,
                )
                .await?;
            return Ok(Dispatched::Failed);
        }

        match self.mark_sent(app.id, now).await {
            Ok(MarkSentOutcome::Sent(_)) => Ok(Dispatched::Sent),
            Ok(MarkSentOutcome::NotEligible(reason)) => {
                warn!(id = %app.id, %reason, "Follow-up sent but not recorded");
                Ok(Dispatched::Skipped)
            }
            Err(e) => {
                // Delivered; the claim keeps it from going out again before
                // the lease expires.
                error!(id = %app.id, error = %e, "Follow-up sent but recording failed");
                Ok(Dispatched::Sent)
            }
        }
    }

    /// Inbox sync (if configured), live policy pass, then dispatch.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, Error> {
        let inbox = match &self.inbox_sync {
            Some(sync) => match sync.tracker.sync(sync.inbox.as_ref(), now).await {
                Ok(report) => Some(report),
                // A mail outage must not block follow-ups.
                Err(e) => {
                    warn!(error = %e, "Inbox sync failed");
                    None
                }
            },
            None => None,
        };

        let policy = self.run_policy_pass(now, false).await?;
        let dispatch = self.dispatch_due(now).await?;
        Ok(TickReport {
            inbox,
            policy,
            dispatch,
        })
    }
}

/// Subject and body for a follow-up email.
pub fn render_follow_up(app: &Application) -> (String, String) {
    let subject = format!("Following up: {} application", app.position);
    let opener = if app.follow_ups_sent == 0 {
        "I wanted to follow up on my application"
    } else {
        "I wanted to check in once more on my application"
    };
    let body = format!(
        "Hello,\n\n\
         {opener} for the {position} role at {company}, submitted on {applied}. \
         I remain very interested in the position and would be glad to share any \
         additional information that would help.\n\n\
         Thank you for your time.\n",
        position = app.position,
        company = app.company,
        applied = app.applied_date.format("%B %-d, %Y"),
    );
    (subject, body)
}

/// Spawn the background ticker on a cron schedule (seconds field first, UTC).
///
/// Tick failures are logged and the next fire retries from scratch.
pub fn spawn_scheduler(
    scheduler: Arc<FollowUpScheduler>,
    expression: &str,
) -> Result<tokio::task::JoinHandle<()>, FollowUpError> {
    let schedule =
        cron::Schedule::from_str(expression).map_err(|e| FollowUpError::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

    info!(schedule = expression, "Follow-up scheduler started");
    Ok(tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Cron schedule has no further fire times, scheduler stopping");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(next = %next, "Scheduler sleeping until next fire");
            tokio::time::sleep(wait).await;

            match scheduler.tick(Utc::now()).await {
                Ok(report) => debug!(
                    flagged = report.policy.flagged.len(),
                    sent = report.dispatch.sent,
                    "Scheduler tick complete"
                ),
                Err(e) => error!(error = %e, "Scheduler tick failed"),
            }
        }
    }))
}
