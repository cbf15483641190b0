use std::sync::Arc;

use actix_web::web;
use db::store::{CredentialStore, UsageLedger};
use middleware::gateway::GatewayMiddleware;

pub use middleware::gateway::GatewayContext;

pub mod routes {
    pub mod key;
    pub mod usage;
}
pub mod middleware {
    pub mod gateway;
}
pub mod usage;

mod service {
    pub(crate) mod key;
    pub(crate) mod usage;
}
mod dtos {
    pub(crate) mod key;
    pub(crate) mod usage;
}

/// Dashboard key management. Expects `JwtClaims` in request extensions and
/// `CredentialStore`, `UsageLedger` and `KeyLimitDefaults` as app data.
pub fn mount_keys() -> actix_web::Scope {
    web::scope("/keys")
        .app_data(common::http::json_config())
        .app_data(common::http::query_config())
        .service(routes::key::get_keys)
        .service(routes::key::post_create_key)
        .service(routes::usage::get_key_usage)
        .service(routes::key::patch_key)
        .service(routes::key::post_toggle_key)
        .service(routes::key::delete_key)
}

pub fn middleware(
    store: Arc<dyn CredentialStore>,
    ledger: Arc<dyn UsageLedger>,
) -> GatewayMiddleware {
    GatewayMiddleware::new(store, ledger)
}
