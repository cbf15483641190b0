use std::sync::Arc;

use actix_web::dev::ServiceRequest;
use async_trait::async_trait;
use db::{
    dtos::usage::UsageCreateRequest,
    models::key::ApiKey,
    store::{CredentialStore, UsageLedger},
};
use uuid::Uuid;

/// Token consumption reported by a handler once it knows it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageReport {
    /// Defaults to the request path.
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Port handed to gateway-protected handlers for after-the-fact accounting.
/// Implementations must not fail the caller: errors are theirs to log.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn log_usage(&self, report: UsageReport);
}

/// Reporter bound to one admitted request: charges output tokens to the key
/// and appends a ledger entry tagged with the caller's metadata.
pub struct UsageLogger {
    store: Arc<dyn CredentialStore>,
    ledger: Arc<dyn UsageLedger>,
    key_id: Uuid,
    user_id: String,
    path: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl UsageLogger {
    pub fn for_request(
        req: &ServiceRequest,
        key: &ApiKey,
        store: Arc<dyn CredentialStore>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        let ip_address = req
            .connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string());

        let user_agent = req
            .headers()
            .get("User-Agent")
            .and_then(|ua| ua.to_str().ok())
            .map(|ua| ua.to_string());

        UsageLogger {
            store,
            ledger,
            key_id: key.id,
            user_id: key.user_id.clone(),
            path: req.path().to_string(),
            ip_address,
            user_agent,
        }
    }
}

#[async_trait]
impl UsageReporter for UsageLogger {
    async fn log_usage(&self, report: UsageReport) {
        if report.output_tokens > 0 {
            if let Err(e) = self.store.add_tokens(&self.key_id, report.output_tokens).await {
                log::error!("Failed to charge tokens to key {}: {}", self.key_id, e);
            }
        }

        let entry = UsageCreateRequest {
            api_key_id: self.key_id,
            user_id: self.user_id.clone(),
            endpoint: report.endpoint.unwrap_or_else(|| self.path.clone()),
            model: report.model,
            input_tokens: report.input_tokens,
            output_tokens: report.output_tokens,
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
        };

        if let Err(e) = self.ledger.append(entry).await {
            log::error!("Failed to log usage for key {}: {}", self.key_id, e);
        }
    }
}
