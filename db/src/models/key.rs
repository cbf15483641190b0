use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ceilings applied to a key. Only the request ceilings gate admission;
/// the token ceiling is reported back to callers in response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct KeyLimits {
    pub requests_per_minute: i64,
    pub requests_per_month: i64,
    pub tokens_per_month: i64,
}

/// Counters for the current minute and month windows, identified by
/// `last_reset_minute` and `last_reset_month`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize,
)]
pub struct KeyUsage {
    pub requests_this_minute: i64,
    pub requests_this_month: i64,
    pub tokens_this_month: i64,
    pub last_reset_minute: i64,
    pub last_reset_month: i64,
}

impl KeyLimits {
    /// Whether rolled-over `usage` leaves room for one more request.
    pub fn has_room(&self, usage: &KeyUsage) -> bool {
        usage.requests_this_minute < self.requests_per_minute
            && usage.requests_this_month < self.requests_per_month
    }
}

impl KeyUsage {
    /// Resets the counters whose window marker is not the given bucket.
    /// The month reset clears requests and tokens together.
    pub fn rolled_over(&self, minute: i64, month: i64) -> KeyUsage {
        let mut next = *self;

        if next.last_reset_minute != minute {
            next.requests_this_minute = 0;
            next.last_reset_minute = minute;
        }

        if next.last_reset_month != month {
            next.requests_this_month = 0;
            next.tokens_this_month = 0;
            next.last_reset_month = month;
        }

        next
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    #[serde(skip)]
    pub token_hash: String,
    pub token_prefix: String,
    pub is_active: bool,
    pub permissions: Vec<String>,
    #[sqlx(flatten)]
    pub limits: KeyLimits,
    #[sqlx(flatten)]
    pub usage: KeyUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
