use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::Deserialize;

use docbatch_api::{BulkWriteResult, Namespace, Record, RecordId, StampedRecord, TxnContext, WriteOp, now_secs};

use crate::error::TxnError;
use crate::ids::{IdGenerator, UuidGenerator};

// ═══════════════════════════════════════════════════════════════
//  WriteKind
// ═══════════════════════════════════════════════════════════════

/// How every record of a batch is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    /// Plain insert; an existing id is a duplicate-key error.
    #[default]
    Insert,
    /// Overwrite fields of existing documents; unknown ids are skipped.
    Update,
    /// Replace or insert.
    Upsert,
}

impl WriteKind {
    fn op(self, record: StampedRecord) -> WriteOp {
        match self {
            WriteKind::Insert => WriteOp::Insert(record),
            WriteKind::Update => WriteOp::Update(record),
            WriteKind::Upsert => WriteOp::Upsert(record),
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteKind::Insert => f.write_str("insert"),
            WriteKind::Update => f.write_str("update"),
            WriteKind::Upsert => f.write_str("upsert"),
        }
    }
}

impl FromStr for WriteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(WriteKind::Insert),
            "update" => Ok(WriteKind::Update),
            "upsert" => Ok(WriteKind::Upsert),
            other => Err(format!("unknown write kind '{other}' (expected insert, update or upsert)")),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Clock
// ═══════════════════════════════════════════════════════════════

/// Source of `updated_at` stamps, in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        now_secs()
    }
}

impl<F> Clock for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now(&self) -> i64 {
        self()
    }
}

// ═══════════════════════════════════════════════════════════════
//  BatchWriter
// ═══════════════════════════════════════════════════════════════

/// Normalizes records and submits them as one grouped write.
///
/// Cheap to clone; clones share the id generator, the clock and the
/// last issued stamp, so stamps never go backwards across clones.
#[derive(Clone)]
pub struct BatchWriter {
    namespace: Namespace,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    last_stamp: Arc<AtomicI64>,
}

impl fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWriter").field("namespace", &self.namespace).finish()
    }
}

impl BatchWriter {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            ids: Arc::new(UuidGenerator),
            clock: Arc::new(SystemClock),
            last_stamp: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Insert all `records` in one grouped request.
    pub async fn write_all(
        &self,
        ctx: &mut dyn TxnContext,
        records: Vec<Record>,
    ) -> Result<BulkWriteResult, TxnError> {
        self.write_all_as(ctx, records, WriteKind::Insert).await
    }

    /// Apply all `records` with `kind` in one grouped request.
    ///
    /// Any store error fails the whole call; per-operation failures are
    /// not interpreted here.
    pub async fn write_all_as(
        &self,
        ctx: &mut dyn TxnContext,
        records: Vec<Record>,
        kind: WriteKind,
    ) -> Result<BulkWriteResult, TxnError> {
        let stamped = self.normalize(records)?;
        if stamped.is_empty() {
            tracing::debug!(namespace = %self.namespace, "empty batch, nothing to write");
            return Ok(BulkWriteResult::default());
        }

        let count = stamped.len();
        let ops: Vec<WriteOp> = stamped.into_iter().map(|r| kind.op(r)).collect();
        tracing::info!(namespace = %self.namespace, count, %kind, "bulk write");

        let result = ctx
            .bulk_write(&self.namespace, ops)
            .await
            .map_err(|e| TxnError::Write(e).with_context(format!("bulk write to {}", self.namespace)))?;

        tracing::info!(namespace = %self.namespace, result = ?result, "bulk write result");
        Ok(result)
    }

    /// Resolve ids and stamp every record with the same timestamp.
    pub fn normalize(&self, records: Vec<Record>) -> Result<Vec<StampedRecord>, TxnError> {
        let now = self.stamp();
        records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                let id = self.resolve_id(i, &record.id)?;
                Ok(record.stamp(id, now))
            })
            .collect()
    }

    fn resolve_id(&self, index: usize, id: &RecordId) -> Result<String, TxnError> {
        match id {
            RecordId::Supplied(id) if id.is_empty() => Err(TxnError::Validation(format!(
                "record {index}: supplied id is empty"
            ))),
            RecordId::Supplied(id) => Ok(id.clone()),
            RecordId::Generate => self.ids.generate().map_err(|e| {
                tracing::warn!(index, error = %e, "failed to generate id");
                TxnError::Validation(format!("record {index} has no id: {e}"))
            }),
        }
    }

    /// One stamp per batch, never earlier than the previous one.
    fn stamp(&self) -> i64 {
        let now = self.clock.now();
        let previous = self.last_stamp.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }
}
