use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One row of the append-only usage ledger.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub api_key_id: Uuid,
    pub user_id: String,
    pub endpoint: String,
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
