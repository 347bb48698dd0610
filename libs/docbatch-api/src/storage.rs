use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::record::StampedRecord;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ═══════════════════════════════════════════════════════════════
//  Namespace
// ═══════════════════════════════════════════════════════════════

/// Database + collection a batch is written to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Write operations
// ═══════════════════════════════════════════════════════════════

/// One operation inside a grouped write. All operations are keyed by `_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert a new document. Fails with `DuplicateKey` if the id exists.
    Insert(StampedRecord),
    /// `$set` all fields of an existing document. Missing id = no match.
    Update(StampedRecord),
    /// Replace the document, inserting it if missing.
    Upsert(StampedRecord),
}

impl WriteOp {
    pub fn record(&self) -> &StampedRecord {
        match self {
            WriteOp::Insert(r) | WriteOp::Update(r) | WriteOp::Upsert(r) => r,
        }
    }

    pub fn into_record(self) -> StampedRecord {
        match self {
            WriteOp::Insert(r) | WriteOp::Update(r) | WriteOp::Upsert(r) => r,
        }
    }

    pub fn id(&self) -> &str {
        &self.record().id
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, WriteOp::Insert(_))
    }
}

/// Store acknowledgement of a grouped write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkWriteResult {
    pub inserted_ids: Vec<String>,
    pub matched: u64,
    pub modified: u64,
    pub upserted_ids: Vec<String>,
}

impl BulkWriteResult {
    /// Number of documents created by the write.
    pub fn created(&self) -> usize {
        self.inserted_ids.len() + self.upserted_ids.len()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Transaction options
// ═══════════════════════════════════════════════════════════════

/// Write acknowledgement policy for commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConcern {
    /// Durable on a majority of replica set members.
    #[default]
    Majority,
    /// Acknowledged by the given number of members.
    Nodes(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnOptions {
    pub write_concern: WriteConcern,
    /// Upper bound for a single commit attempt on the server.
    pub max_commit_time: Option<Duration>,
}

impl TxnOptions {
    pub fn majority() -> Self {
        Self::default()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Store traits
// ═══════════════════════════════════════════════════════════════

/// Operations available inside an open transaction.
pub trait TxnContext: Send {
    /// Submit all `ops` as one grouped request against `ns`.
    fn bulk_write<'a>(
        &'a mut self,
        ns: &'a Namespace,
        ops: Vec<WriteOp>,
    ) -> BoxFuture<'a, Result<BulkWriteResult, StoreError>>;
}

/// Body of a transaction as seen by the store.
///
/// The store may invoke it more than once: every retry of a transient
/// failure starts a fresh transaction and runs the body again.
pub trait TxnBody: Send + Sync {
    fn run<'a>(&'a self, ctx: &'a mut dyn TxnContext) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// A server-side session. Owned by exactly one caller at a time;
/// dropping it releases the session.
pub trait StoreSession: Send {
    /// Start a transaction, run `body`, commit.
    ///
    /// Aborts when `body` fails. Transient errors (write conflicts, unknown
    /// commit results) are retried according to the store's own policy;
    /// whatever remains after that is returned.
    fn with_transaction<'a>(
        &'a mut self,
        options: &'a TxnOptions,
        body: &'a dyn TxnBody,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Abort the active transaction, if any. No-op otherwise.
    fn abort(&mut self) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// A live handle to a document store.
pub trait DocumentStore: Send + Sync {
    fn start_session(&self) -> BoxFuture<'_, Result<Box<dyn StoreSession>, StoreError>>;

    /// Delete every document in `ns`. Returns the number removed.
    fn clear<'a>(&'a self, ns: &'a Namespace) -> BoxFuture<'a, Result<u64, StoreError>>;

    fn count<'a>(&'a self, ns: &'a Namespace) -> BoxFuture<'a, Result<u64, StoreError>>;

    fn find<'a>(
        &'a self,
        ns: &'a Namespace,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<StampedRecord>, StoreError>>;
}
