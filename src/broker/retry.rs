//! Retry and escalation policy for reconciled orders
//!
//! | Brokerage status          | Action                                        |
//! |---------------------------|-----------------------------------------------|
//! | OPEN past the interval    | escalate: re-price at LTP, then go MARKET     |
//! | CANCELED/REJECTED by user | terminal CANCELED                             |
//! | CANCELED/REJECTED, other  | re-place up to `max_retries`, then force-cancel |

use crate::config::MonitorConfig;
use chrono::{DateTime, Duration, Utc};

/// Retry limits shared by escalation and resubmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Minimum time between two retries of the same order
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for RetryPolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            max_retries: config.retry_count,
            interval: Duration::from_std(config.retry_interval())
                .unwrap_or_else(|_| Duration::seconds(i64::from(u32::MAX))),
        }
    }
}

/// Per-order retry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    pub retry_count: u32,
    pub last_retry_time: DateTime<Utc>,
}

impl RetryRecord {
    /// Record for an order first seen at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            retry_count: 0,
            last_retry_time: now,
        }
    }

    /// Strictly more than one interval since the last retry
    pub fn interval_elapsed(&self, now: DateTime<Utc>, policy: &RetryPolicy) -> bool {
        now - self.last_retry_time > policy.interval
    }

    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.retry_count >= policy.max_retries
    }

    /// Count an attempt, successful or not
    pub fn bump(&mut self, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_retry_time = now;
    }

    /// Next escalation step for a stale OPEN order
    pub fn escalation(&self) -> Escalation {
        if self.retry_count == 0 {
            Escalation::Reprice
        } else {
            Escalation::Market
        }
    }
}

/// How a stale OPEN order is pushed toward execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Keep LIMIT, move the price to the last traded price
    Reprice,
    /// Convert to MARKET
    Market,
}

/// What to do with an order the brokerage canceled or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAction {
    /// Cancellation the user asked for
    Accept,
    /// Place the remaining quantity again
    Resubmit,
    /// Retry budget spent; cancel locally
    Force,
    /// Not due yet
    Wait,
}

/// Decide how to handle a CANCELED/REJECTED status
///
/// The first resubmission goes out as soon as the rejection is seen; later
/// ones wait for the retry interval.
pub fn cancel_action(
    reason: Option<&str>,
    record: &RetryRecord,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> CancelAction {
    if is_user_cancel(reason) {
        CancelAction::Accept
    } else if record.is_exhausted(policy) {
        CancelAction::Force
    } else if record.retry_count == 0 || record.interval_elapsed(now, policy) {
        CancelAction::Resubmit
    } else {
        CancelAction::Wait
    }
}

/// Empty reasons and explicit user cancellations are clean terminations
pub fn is_user_cancel(reason: Option<&str>) -> bool {
    let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) else {
        return true;
    };
    let reason = reason.to_lowercase().replace("cancelled", "canceled");
    reason.contains("user canceled") || reason.contains("canceled by user")
}
