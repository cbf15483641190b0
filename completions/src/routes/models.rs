use actix_web::{Responder, get};
use common::{error::Res, http::Success};

use crate::models;

/// Lists the models this gateway serves.
#[get("")]
pub async fn get_models() -> Res<impl Responder> {
    Success::ok(models::catalogue())
}
