use common::error::Res;
use db::{
    dtos::usage::UsageFilter,
    store::{CredentialStore, UsageLedger},
};
use uuid::Uuid;

use crate::{
    dtos::usage::{KeyUsageRequest, UsageResponse},
    service::key::not_found,
};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

/// Retrieves ledger entries of one key, newest first.
///
/// The key must belong to `user_id`; entries of deleted keys are therefore
/// only reachable through the ledger itself.
pub async fn get_key_usage(
    store: &dyn CredentialStore,
    ledger: &dyn UsageLedger,
    key_id: &Uuid,
    user_id: &str,
    req: KeyUsageRequest,
) -> Res<UsageResponse> {
    store
        .get_key(key_id, user_id)
        .await?
        .ok_or_else(|| not_found(key_id))?;

    let limit = req.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let events = ledger
        .list(UsageFilter {
            api_key_id: Some(*key_id),
            user_id: Some(user_id.to_string()),
            since: req.since,
            until: req.until,
            limit: Some(limit),
        })
        .await?;

    Ok(UsageResponse {
        key_id: *key_id,
        input_tokens: events.iter().map(|e| e.input_tokens).sum(),
        output_tokens: events.iter().map(|e| e.output_tokens).sum(),
        events,
    })
}
