use std::sync::Arc;

use docbatch_api::DocumentStore;
use storage_memory::MemoryStore;
use storage_mongodb::MongoStore;

use super::config::Effective;
use super::error::DocbatchError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Mongodb,
    /// Process-local store, gone when the process exits.
    Memory,
}

pub async fn open_store(eff: &Effective) -> Result<Arc<dyn DocumentStore>, DocbatchError> {
    match eff.store {
        StoreKind::Mongodb => {
            let store = MongoStore::connect(&eff.mongodb).await?;
            Ok(Arc::new(store))
        }
        StoreKind::Memory => {
            tracing::info!(max_attempts = eff.memory.max_attempts, "using in-memory store");
            Ok(Arc::new(MemoryStore::from_config(eff.memory.clone())))
        }
    }
}
