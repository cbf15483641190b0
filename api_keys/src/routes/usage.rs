use actix_web::{
    Responder, get,
    web::{self},
};
use common::{error::Res, http::Success, jwt::JwtClaims};
use db::store::{CredentialStore, UsageLedger};
use uuid::Uuid;

use crate::{dtos::usage::KeyUsageRequest, service};

/// Retrieves usage ledger entries for one of the caller's keys.
///
/// # Arguments
///
/// * `claims` - The JWT claims of the authenticated user.
/// * `store` - The credential store, used for the ownership check.
/// * `ledger` - The usage ledger.
/// * `path` - The key id.
/// * `req` - Optional `limit`, `since` and `until` filters.
///
/// # Returns
///
/// A `Result` containing a `Success` response with the entries, newest first.
#[get("/{id}/usage")]
pub async fn get_key_usage(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<dyn CredentialStore>,
    ledger: web::Data<dyn UsageLedger>,
    path: web::Path<Uuid>,
    req: web::Query<KeyUsageRequest>,
) -> Res<impl Responder> {
    let usage = service::usage::get_key_usage(
        store.get_ref(),
        ledger.get_ref(),
        &path.into_inner(),
        &claims.user_id,
        req.into_inner(),
    )
    .await?;
    Success::ok(usage)
}
