use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use db::models::key::{KeyLimits, KeyUsage};

use crate::quota::Window;

pub const LIMIT_REQUESTS: &str = "x-ratelimit-limit-requests";
pub const REMAINING_REQUESTS: &str = "x-ratelimit-remaining-requests";
pub const RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
pub const LIMIT_TOKENS: &str = "x-ratelimit-limit-tokens";
pub const REMAINING_TOKENS: &str = "x-ratelimit-remaining-tokens";

/// Quota introspection values sent back with every admitted response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaHeaders {
    pub limit_requests: i64,
    pub remaining_requests: i64,
    pub reset_requests: i64,
    pub limit_tokens: i64,
    pub remaining_tokens: i64,
}

impl QuotaHeaders {
    /// `usage` is the post-admission snapshot; remaining values floor at zero
    /// because token usage can overshoot its ceiling after the fact.
    pub fn new(limits: &KeyLimits, usage: &KeyUsage, window: Window) -> Self {
        QuotaHeaders {
            limit_requests: limits.requests_per_minute,
            remaining_requests: (limits.requests_per_minute - usage.requests_this_minute).max(0),
            reset_requests: window.requests_reset_at(),
            limit_tokens: limits.tokens_per_month,
            remaining_tokens: (limits.tokens_per_month - usage.tokens_this_month).max(0),
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            (LIMIT_REQUESTS, self.limit_requests),
            (REMAINING_REQUESTS, self.remaining_requests),
            (RESET_REQUESTS, self.reset_requests),
            (LIMIT_TOKENS, self.limit_tokens),
            (REMAINING_TOKENS, self.remaining_tokens),
        ] {
            headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
        }
    }
}
