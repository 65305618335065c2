//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;

use crate::error::ConfigError;
use crate::mail::EmailConfig;

/// Follow-up policy knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpConfig {
    /// Days after applying before the first follow-up is due.
    pub threshold_days: i64,
    /// Hard cap on delivered follow-ups per application.
    pub max_follow_ups: u32,
    /// Days between a delivered follow-up and the next one.
    pub retry_interval_days: i64,
    /// Delay between queueing a follow-up and dispatching it.
    pub dispatch_buffer_days: i64,
    /// First retry delay after a failed send; doubles per consecutive failure.
    pub send_backoff_base: Duration,
    /// Upper bound on the failed-send retry delay.
    pub send_backoff_cap: Duration,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            threshold_days: 7,
            max_follow_ups: 2,
            retry_interval_days: 14,
            dispatch_buffer_days: 1,
            send_backoff_base: Duration::hours(1),
            send_backoff_cap: Duration::hours(24),
        }
    }
}

/// Background scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Cron expression (seconds field first), evaluated in UTC.
    pub schedule: String,
    /// Pull unseen replies from the inbox before each policy pass.
    pub sync_inbox: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 0 9 * * *".to_string(),
            sync_inbox: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub db_path: PathBuf,
    pub http_port: u16,
    /// Directory for rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub follow_up: FollowUpConfig,
    pub scheduler: SchedulerConfig,
    /// `None` when mail is not configured.
    pub email: Option<EmailConfig>,
}

impl TrackerConfig {
    /// Load from the process environment (after `.env`-style exports).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = FollowUpConfig::default();
        let days = |key: &str, default: i64| {
            parse_or(&lookup, key, default).and_then(|value| within(key, value, MAX_DAYS))
        };
        let minutes = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.num_minutes())
                .and_then(|value| within(key, value, MAX_BACKOFF_MINUTES))
                .map(Duration::minutes)
        };

        let follow_up = FollowUpConfig {
            threshold_days: days("JOB_TRACKER_THRESHOLD_DAYS", defaults.threshold_days)?,
            max_follow_ups: parse_or(
                &lookup,
                "JOB_TRACKER_MAX_FOLLOW_UPS",
                defaults.max_follow_ups,
            )?,
            retry_interval_days: days(
                "JOB_TRACKER_RETRY_INTERVAL_DAYS",
                defaults.retry_interval_days,
            )?,
            dispatch_buffer_days: days(
                "JOB_TRACKER_DISPATCH_BUFFER_DAYS",
                defaults.dispatch_buffer_days,
            )?,
            send_backoff_base: minutes(
                "JOB_TRACKER_SEND_BACKOFF_MINUTES",
                defaults.send_backoff_base,
            )?,
            send_backoff_cap: minutes(
                "JOB_TRACKER_SEND_BACKOFF_CAP_MINUTES",
                defaults.send_backoff_cap,
            )?,
        };

        if follow_up.send_backoff_base > follow_up.send_backoff_cap {
            return Err(ConfigError::InvalidValue {
                key: "JOB_TRACKER_SEND_BACKOFF_MINUTES".to_string(),
                message: "must not exceed JOB_TRACKER_SEND_BACKOFF_CAP_MINUTES".to_string(),
            });
        }

        let scheduler_defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            enabled: parse_or(
                &lookup,
                "JOB_TRACKER_SCHEDULER_ENABLED",
                scheduler_defaults.enabled,
            )?,
            schedule: lookup("JOB_TRACKER_SCHEDULE").unwrap_or(scheduler_defaults.schedule),
            sync_inbox: parse_or(
                &lookup,
                "JOB_TRACKER_SYNC_INBOX",
                scheduler_defaults.sync_inbox,
            )?,
        };

        let db_path = lookup("JOB_TRACKER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/job-tracker.db"));

        Ok(Self {
            db_path,
            http_port: parse_or(&lookup, "JOB_TRACKER_HTTP_PORT", 8080)?,
            log_dir: lookup("JOB_TRACKER_LOG_DIR").map(PathBuf::from),
            follow_up,
            scheduler,
            email: EmailConfig::from_lookup(&lookup),
        })
    }
}

/// Ten years.
const MAX_DAYS: i64 = 3650;
/// One week.
const MAX_BACKOFF_MINUTES: i64 = 7 * 24 * 60;

fn within(key: &str, value: i64, max: i64) -> Result<i64, ConfigError> {
    if (0..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be between 0 and {max}"),
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
