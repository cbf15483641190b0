use chrono::{DateTime, Utc};
use db::models::usage::UsageEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct KeyUsageRequest {
    pub limit: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub key_id: Uuid,
    /// Totals over `events` only, not over the whole ledger.
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub events: Vec<UsageEvent>,
}
