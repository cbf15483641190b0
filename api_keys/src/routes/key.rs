use actix_web::{
    Responder, delete, get, patch, post,
    web::{self},
};
use common::{env_config::KeyLimitDefaults, error::Res, http::Success, jwt::JwtClaims};
use db::store::CredentialStore;
use uuid::Uuid;

use crate::{
    dtos::key::{CreateKeyRequest, ToggleKeyRequest, UpdateKeyRequest},
    service,
};

/// Retrieves all API keys of the authenticated user.
///
/// # Arguments
///
/// * `claims` - The JWT claims of the authenticated user.
/// * `store` - The credential store.
///
/// # Returns
///
/// A `Result` containing a `Success` response with the keys, newest first.
#[get("")]
pub async fn get_keys(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<dyn CredentialStore>,
) -> Res<impl Responder> {
    let keys = service::key::get_keys(store.get_ref(), &claims.user_id).await?;
    Success::ok(keys)
}

/// Issues a new API key for the authenticated user.
///
/// # Arguments
///
/// * `claims` - The JWT claims of the authenticated user.
/// * `store` - The credential store.
/// * `defaults` - Limits assigned to new keys.
/// * `req` - Name and optional permissions of the key.
///
/// # Returns
///
/// A `Result` containing a `Success` response with the key record and its
/// plaintext token, which is never shown again.
#[post("")]
pub async fn post_create_key(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<dyn CredentialStore>,
    defaults: web::Data<KeyLimitDefaults>,
    req: web::Json<CreateKeyRequest>,
) -> Res<impl Responder> {
    let key = service::key::create_key(
        store.get_ref(),
        &claims.user_id,
        &defaults,
        req.into_inner(),
    )
    .await?;
    Success::created(key)
}

/// Renames a key or replaces its permissions or limits.
#[patch("/{id}")]
pub async fn patch_key(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<dyn CredentialStore>,
    path: web::Path<Uuid>,
    req: web::Json<UpdateKeyRequest>,
) -> Res<impl Responder> {
    let key = service::key::update_key(
        store.get_ref(),
        &path.into_inner(),
        &claims.user_id,
        req.into_inner(),
    )
    .await?;
    Success::ok(key)
}

/// Activates or deactivates a key.
#[post("/{id}/toggle")]
pub async fn post_toggle_key(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<dyn CredentialStore>,
    path: web::Path<Uuid>,
    req: web::Json<ToggleKeyRequest>,
) -> Res<impl Responder> {
    let key = service::key::set_key_active(
        store.get_ref(),
        &path.into_inner(),
        &claims.user_id,
        req.is_active,
    )
    .await?;
    Success::ok(key)
}

#[delete("/{id}")]
pub async fn delete_key(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<dyn CredentialStore>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    service::key::delete_key(store.get_ref(), &path.into_inner(), &claims.user_id).await?;
    Success::no_content()
}
