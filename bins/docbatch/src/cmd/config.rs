use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use docbatch_engine::{RunnerConfig, WriteKind};
use storage_memory::MemoryStoreConfig;
use storage_mongodb::MongoStoreConfig;

use super::error::DocbatchError;
use super::store::StoreKind;

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub store: Option<StoreKind>,
    pub database: Option<String>,
    pub collection: Option<String>,
    pub deleted: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub kind: Option<WriteKind>,
    pub pause_ms: Option<u64>,
    #[serde(default)]
    pub mongodb: Option<MongoStoreConfig>,
    #[serde(default)]
    pub memory: Option<MemoryStoreConfig>,
    #[serde(default)]
    pub transaction: RunnerConfig,
}

pub fn load_config(path: &str) -> Result<Config, DocbatchError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DocbatchError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| DocbatchError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Path to docbatch.toml
    #[arg(long, default_value = "docbatch.toml", env = "DOCBATCH_CONFIG")]
    pub config: String,

    /// Store backend: mongodb or memory
    #[arg(long)]
    pub store: Option<StoreKind>,

    /// MongoDB connection string
    #[arg(long, env = "DOCBATCH_URI")]
    pub uri: Option<String>,

    #[arg(long)]
    pub database: Option<String>,

    #[arg(long)]
    pub collection: Option<String>,

    /// Delete all documents in the collection before writing.
    /// `--deleted false` turns off `deleted = true` from the config file.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub deleted: Option<bool>,

    /// Deadline for the transaction, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// How records are written: insert, update or upsert
    #[arg(long)]
    pub kind: Option<WriteKind>,

    /// Keep the transaction open this long after writing (ms)
    #[arg(long)]
    pub pause_ms: Option<u64>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Final settings after merging: config file < env/CLI.
#[derive(Debug)]
pub struct Effective {
    pub store: StoreKind,
    pub mongodb: MongoStoreConfig,
    pub memory: MemoryStoreConfig,
    pub database: String,
    pub collection: String,
    pub deleted: bool,
    pub kind: WriteKind,
    pub pause: Duration,
    pub transaction: RunnerConfig,
}

impl Effective {
    pub fn new(args: &RunArgs) -> Result<Self, DocbatchError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };

        let mut mongodb = cfg.mongodb.unwrap_or_default();
        if let Some(uri) = &args.uri {
            mongodb.uri = uri.clone();
        }

        let mut transaction = cfg.transaction;
        if let Some(secs) = args.timeout_secs.or(cfg.timeout_secs) {
            transaction.timeout_ms = Some(secs.saturating_mul(1000));
        } else if transaction.timeout_ms.is_none() {
            transaction.timeout_ms = Some(10_000);
        }

        let database = args.database.clone().or(cfg.database).unwrap_or_else(|| "test".into());
        let collection = args
            .collection
            .clone()
            .or(cfg.collection)
            .unwrap_or_else(|| "bookInfo".into());
        if database.is_empty() || collection.is_empty() {
            return Err(DocbatchError::Config("database and collection must not be empty".into()));
        }

        Ok(Self {
            store: args.store.or(cfg.store).unwrap_or_default(),
            mongodb,
            memory: cfg.memory.unwrap_or_default(),
            database,
            collection,
            deleted: args.deleted.or(cfg.deleted).unwrap_or(false),
            kind: args.kind.or(cfg.kind).unwrap_or_default(),
            pause: Duration::from_millis(args.pause_ms.or(cfg.pause_ms).unwrap_or(0)),
            transaction,
        })
    }
}
