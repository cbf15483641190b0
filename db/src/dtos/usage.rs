use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::usage::UsageEvent;

pub struct UsageCreateRequest {
    pub api_key_id: Uuid,
    pub user_id: String,
    pub endpoint: String,
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl UsageCreateRequest {
    pub fn into_event(self, id: Uuid, timestamp: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            id,
            api_key_id: self.api_key_id,
            user_id: self.user_id,
            endpoint: self.endpoint,
            model: self.model,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            timestamp,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
        }
    }
}

#[derive(Default)]
pub struct UsageFilter {
    pub api_key_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl UsageFilter {
    pub fn matches(&self, event: &UsageEvent) -> bool {
        self.api_key_id.is_none_or(|id| event.api_key_id == id)
            && self
                .user_id
                .as_ref()
                .is_none_or(|user_id| &event.user_id == user_id)
            && self.since.is_none_or(|since| event.timestamp > since)
            && self.until.is_none_or(|until| event.timestamp < until)
    }
}
