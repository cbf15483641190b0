mod cors;
mod store;

use std::sync::Arc;

use actix_web::{
    App, HttpServer,
    web::{self},
};
use common::env_config::Config;
use completions::{provider::ChatProvider, xai::XaiClient};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // get env vars
    let config = Config::from_env();
    let config_data = config.clone();
    let origin = config.cors_allowed_origin.clone();

    // init logger
    if config.console_logging_enabled {
        logger::setup(&config.log_level, &config.log_file).expect("Failed to set up logger");
    }

    // init credential store and usage ledger
    let stores = store::setup(&config)
        .await
        .expect("Failed to set up credential store");

    // init upstream client
    if config.provider.api_key.is_empty() {
        log::warn!("XAI_API_KEY is empty, upstream calls will be rejected");
    }
    let provider: Arc<dyn ChatProvider> =
        Arc::new(XaiClient::new(&config.provider).expect("Failed to build upstream client"));

    // one limiter for all workers
    let global_limiter = limiter::global_middleware(config.global_requests_per_second);
    let key_defaults = config.key_defaults;

    log::info!(
        "Starting gateway on {}:{} ({} environment)",
        config.server_host,
        config.server_port,
        config.environment
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config_data.clone()))
            .app_data(web::Data::from(stores.credentials.clone()))
            .app_data(web::Data::from(stores.ledger.clone()))
            .app_data(web::Data::from(provider.clone()))
            .app_data(web::Data::new(key_defaults))
            .wrap(global_limiter.clone()) // 3rd
            .wrap(logger::middleware()) // 2nd
            .wrap(cors::middleware(&origin)) // 1st
            .service(
                web::scope("/api")
                    .service(
                        web::scope("/dashboard")
                            .wrap(api_auth::auth_middleware(config_data.clone()))
                            .service(api_keys::mount_keys()),
                    )
                    .service(
                        web::scope("/v1")
                            .wrap(api_keys::middleware(
                                stores.credentials.clone(),
                                stores.ledger.clone(),
                            ))
                            .service(completions::mount_models())
                            .service(completions::mount_chat()),
                    ),
            )
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .workers(config.num_workers)
    .run()
    .await
}
