//! Fixed-window admission for per-key request quotas.
//!
//! Counters reset sharply when the clock enters a new minute or month
//! bucket. Evaluation is pure: it never touches storage and never fails.
//! Stores repeat the same rollover and ceiling check when they consume a
//! request atomically.

use chrono::{DateTime, Datelike, Utc};
use db::models::key::{KeyLimits, KeyUsage};

/// Minute and month buckets containing a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Whole minutes since the Unix epoch.
    pub minute: i64,
    /// `year * 12 + month0`. Coarse UTC month index, not billing-calendar aware.
    pub month: i64,
}

impl Window {
    pub fn at(now: DateTime<Utc>) -> Self {
        Window {
            minute: now.timestamp_millis().div_euclid(60_000),
            month: i64::from(now.year()) * 12 + i64::from(now.month0()),
        }
    }

    /// Epoch seconds at which the per-minute request budget refills.
    pub fn requests_reset_at(&self) -> i64 {
        (self.minute + 1) * 60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MinuteLimit,
    MonthLimit,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::MinuteLimit => "Rate limit exceeded",
            Rejection::MonthLimit => "Monthly request limit exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `usage` is rolled over and already counts the admitted request.
    Admitted { usage: KeyUsage, window: Window },
    /// `usage` is rolled over but not incremented.
    Rejected {
        reason: Rejection,
        usage: KeyUsage,
        window: Window,
    },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }
}

/// Resets the counters whose window marker is not the current bucket.
/// The month reset clears requests and tokens together.
pub fn roll_over(usage: &KeyUsage, window: Window) -> KeyUsage {
    usage.rolled_over(window.minute, window.month)
}

/// Decides whether one more request fits in the key's request quotas.
///
/// Limits are compared before incrementing. Tokens are not charged here and
/// the token ceiling does not gate admission.
pub fn evaluate(limits: &KeyLimits, usage: &KeyUsage, now: DateTime<Utc>) -> Decision {
    let window = Window::at(now);
    let mut usage = roll_over(usage, window);

    if usage.requests_this_minute >= limits.requests_per_minute {
        return Decision::Rejected {
            reason: Rejection::MinuteLimit,
            usage,
            window,
        };
    }

    if usage.requests_this_month >= limits.requests_per_month {
        return Decision::Rejected {
            reason: Rejection::MonthLimit,
            usage,
            window,
        };
    }

    usage.requests_this_minute += 1;
    usage.requests_this_month += 1;

    Decision::Admitted { usage, window }
}
