use std::sync::Arc;

use common::env_config::Config;
use db::{
    memory::MemoryStore,
    store::{CredentialStore, PgStore, UsageLedger},
};

/// Credential store and usage ledger shared by every worker.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub ledger: Arc<dyn UsageLedger>,
}

/// Postgres when `DATABASE_URL` is set, otherwise a process-local store
/// whose keys and usage vanish on restart.
pub async fn setup(config: &Config) -> Result<Stores, Box<dyn std::error::Error>> {
    match &config.database_url {
        Some(url) => {
            let pool = db::setup(url, config.is_production()).await?;
            let store = Arc::new(PgStore::new(pool));
            log::info!("Using Postgres credential store");
            Ok(Stores {
                credentials: store.clone(),
                ledger: store,
            })
        }
        None => {
            log::warn!("DATABASE_URL not set, keys and usage are kept in memory only");
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                credentials: store.clone(),
                ledger: store,
            })
        }
    }
}
