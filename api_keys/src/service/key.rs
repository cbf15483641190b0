use common::{
    env_config::KeyLimitDefaults,
    error::{AppError, Res},
    key::IssuedToken,
};
use db::{
    dtos::key::{KeyCreateRequest, KeyUpdateRequest},
    models::key::{ApiKey, KeyLimits},
    store::CredentialStore,
};
use uuid::Uuid;

use crate::dtos::key::{CreateKeyRequest, CreateKeyResponse, UpdateKeyRequest};

pub const MAX_NAME_LEN: usize = 100;

/// Granted to new keys when the request names none.
pub const DEFAULT_PERMISSIONS: [&str; 2] = ["chat.completions", "models.list"];

/// Retrieves all keys owned by `user_id`, newest first.
pub async fn get_keys(store: &dyn CredentialStore, user_id: &str) -> Res<Vec<ApiKey>> {
    store.list_by_user(user_id).await
}

/// Issues a new key for `user_id`.
///
/// # Returns
///
/// The stored record together with the plaintext token. The token is not
/// recoverable afterwards; only its hash is persisted.
pub async fn create_key(
    store: &dyn CredentialStore,
    user_id: &str,
    defaults: &KeyLimitDefaults,
    req: CreateKeyRequest,
) -> Res<CreateKeyResponse> {
    let name = validate_name(&req.name)?;
    let permissions = req
        .permissions
        .unwrap_or_else(|| DEFAULT_PERMISSIONS.iter().map(|p| p.to_string()).collect());

    let issued = IssuedToken::generate();
    let key = store
        .insert(KeyCreateRequest {
            user_id: user_id.to_string(),
            name,
            token_hash: issued.hash,
            token_prefix: issued.prefix,
            permissions,
            limits: KeyLimits {
                requests_per_minute: defaults.requests_per_minute,
                requests_per_month: defaults.requests_per_month,
                tokens_per_month: defaults.tokens_per_month,
            },
        })
        .await?;

    log::info!("Issued key {} ({}) for user {}", key.id, key.token_prefix, user_id);
    Ok(CreateKeyResponse {
        key,
        token: issued.token,
    })
}

pub async fn update_key(
    store: &dyn CredentialStore,
    key_id: &Uuid,
    user_id: &str,
    req: UpdateKeyRequest,
) -> Res<ApiKey> {
    let name = req.name.as_deref().map(validate_name).transpose()?;
    if let Some(limits) = &req.limits {
        validate_limits(limits)?;
    }

    store
        .update(
            key_id,
            user_id,
            KeyUpdateRequest {
                name,
                permissions: req.permissions,
                limits: req.limits,
            },
        )
        .await?
        .ok_or_else(|| not_found(key_id))
}

pub async fn set_key_active(
    store: &dyn CredentialStore,
    key_id: &Uuid,
    user_id: &str,
    is_active: bool,
) -> Res<ApiKey> {
    let key = store
        .set_active(key_id, user_id, is_active)
        .await?
        .ok_or_else(|| not_found(key_id))?;
    log::info!(
        "Key {} {}",
        key.token_prefix,
        if is_active { "activated" } else { "deactivated" }
    );
    Ok(key)
}

pub async fn delete_key(store: &dyn CredentialStore, key_id: &Uuid, user_id: &str) -> Res<()> {
    if !store.delete(key_id, user_id).await? {
        return Err(not_found(key_id));
    }
    log::info!("Deleted key {} of user {}", key_id, user_id);
    Ok(())
}

pub(crate) fn not_found(key_id: &Uuid) -> AppError {
    AppError::NotFound(format!("API key {} not found", key_id))
}

fn validate_name(name: &str) -> Res<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Key name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "Key name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn validate_limits(limits: &KeyLimits) -> Res<()> {
    if limits.requests_per_minute <= 0
        || limits.requests_per_month <= 0
        || limits.tokens_per_month <= 0
    {
        return Err(AppError::BadRequest("Limits must be positive".to_string()));
    }
    Ok(())
}
