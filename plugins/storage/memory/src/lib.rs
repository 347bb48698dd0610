use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::RwLock;

use docbatch_api::{
    BoxFuture, BulkWriteResult, DocumentStore, Namespace, StampedRecord, StoreError, StoreSession,
    TxnBody, TxnContext, TxnOptions, WriteOp,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryStoreConfig {
    /// Transaction attempts before a write conflict is reported as fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  State
// ═══════════════════════════════════════════════════════════════

struct Document {
    record: StampedRecord,
    /// Commit that last wrote this document.
    version: u64,
}

#[derive(Default)]
struct State {
    collections: HashMap<Namespace, BTreeMap<String, Document>>,
    /// Version at which `clear` removed a document, until it is written again.
    tombstones: HashMap<Namespace, HashMap<String, u64>>,
    /// Monotonic commit counter.
    version: u64,
}

impl State {
    fn get(&self, ns: &Namespace, id: &str) -> Option<&Document> {
        self.collections.get(ns).and_then(|c| c.get(id))
    }

    /// Version of the last commit or clear that touched `id`.
    fn last_write(&self, ns: &Namespace, id: &str) -> Option<u64> {
        let written = self.get(ns, id).map(|d| d.version);
        let deleted = self.tombstones.get(ns).and_then(|t| t.get(id)).copied();
        written.max(deleted)
    }

    fn conflict(&self, start_version: u64, ns: &Namespace, id: &str) -> Result<(), StoreError> {
        match self.last_write(ns, id) {
            Some(version) if version > start_version => Err(StoreError::write_conflict(format!(
                "document {id} in {ns} was modified by a concurrent transaction"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
struct Faults {
    commit_conflicts: AtomicU32,
    unavailable: AtomicBool,
}

impl Faults {
    fn take_commit_conflict(&self) -> bool {
        self.commit_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-process transactional document store.
///
/// Snapshot isolation with first-committer-wins conflict detection: a
/// transaction that touches a document committed by someone else after
/// it started fails with a transient write conflict and is retried.
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    faults: Arc<Faults>,
    max_attempts: u32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_config(MemoryStoreConfig::default())
    }

    pub fn from_config(config: MemoryStoreConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            faults: Arc::new(Faults::default()),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Make the next `n` commits fail with a transient write conflict.
    pub fn inject_commit_conflicts(&self, n: u32) {
        self.faults.commit_conflicts.store(n, Ordering::SeqCst);
    }

    /// While set, new sessions cannot be started.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All committed documents of `ns`, ordered by id.
    pub async fn snapshot(&self, ns: &Namespace) -> Vec<StampedRecord> {
        let state = self.state.read().await;
        state
            .collections
            .get(ns)
            .map(|c| c.values().map(|d| d.record.clone()).collect())
            .unwrap_or_default()
    }
}

impl DocumentStore for MemoryStore {
    fn start_session(&self) -> BoxFuture<'_, Result<Box<dyn StoreSession>, StoreError>> {
        Box::pin(async move {
            if self.faults.unavailable() {
                return Err(StoreError::session("memory store is unavailable"));
            }
            let session: Box<dyn StoreSession> = Box::new(MemorySession {
                state: self.state.clone(),
                faults: self.faults.clone(),
                max_attempts: self.max_attempts,
                txn: None,
            });
            Ok(session)
        })
    }

    fn clear<'a>(&'a self, ns: &'a Namespace) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.version += 1;
            let Some(removed) = state.collections.remove(ns) else {
                return Ok(0);
            };
            let tombstones = state.tombstones.entry(ns.clone()).or_default();
            for id in removed.keys() {
                tombstones.insert(id.clone(), state.version);
            }
            Ok(removed.len() as u64)
        })
    }

    fn count<'a>(&'a self, ns: &'a Namespace) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state.collections.get(ns).map_or(0, |c| c.len() as u64))
        })
    }

    fn find<'a>(
        &'a self,
        ns: &'a Namespace,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<StampedRecord>, StoreError>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state.get(ns, id).map(|d| d.record.clone()))
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Session / transaction
// ═══════════════════════════════════════════════════════════════

/// Writes buffered by an open transaction.
struct Txn {
    start_version: u64,
    writes: HashMap<Namespace, BTreeMap<String, StampedRecord>>,
}

impl Txn {
    fn staged(&self, ns: &Namespace, id: &str) -> Option<&StampedRecord> {
        self.writes.get(ns).and_then(|w| w.get(id))
    }
}

struct MemorySession {
    state: Arc<RwLock<State>>,
    faults: Arc<Faults>,
    max_attempts: u32,
    txn: Option<Txn>,
}

impl MemorySession {
    async fn begin(&mut self) {
        let start_version = self.state.read().await.version;
        self.txn = Some(Txn {
            start_version,
            writes: HashMap::new(),
        });
    }

    async fn attempt(&mut self, body: &dyn TxnBody) -> Result<(), StoreError> {
        self.begin().await;
        let outcome = match self.txn.as_mut() {
            Some(txn) => {
                let mut ctx = MemoryTxn {
                    state: self.state.clone(),
                    txn,
                };
                body.run(&mut ctx).await
            }
            None => Err(StoreError::transaction("transaction was not started")),
        };
        match outcome {
            Ok(()) => self.commit().await,
            Err(e) => {
                self.txn = None;
                Err(e)
            }
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let Some(txn) = self.txn.take() else {
            return Err(StoreError::transaction("no transaction to commit"));
        };
        if self.faults.take_commit_conflict() {
            return Err(StoreError::write_conflict("injected commit conflict"));
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        for (ns, writes) in &txn.writes {
            for id in writes.keys() {
                state.conflict(txn.start_version, ns, id)?;
            }
        }

        state.version += 1;
        let version = state.version;
        for (ns, writes) in txn.writes {
            let mut tombstones = state.tombstones.remove(&ns).unwrap_or_default();
            let collection = state.collections.entry(ns.clone()).or_default();
            for (id, record) in writes {
                tombstones.remove(&id);
                collection.insert(id, Document { record, version });
            }
            if !tombstones.is_empty() {
                state.tombstones.insert(ns, tombstones);
            }
        }
        Ok(())
    }
}

impl StoreSession for MemorySession {
    fn with_transaction<'a>(
        &'a mut self,
        _options: &'a TxnOptions,
        body: &'a dyn TxnBody,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.attempt(body).await {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_transient() && attempt < self.max_attempts => {
                        tracing::debug!(attempt, error = %e, "transient transaction error, retrying");
                    }
                    Err(e) if e.is_transient() => {
                        return Err(StoreError::transaction(format!(
                            "retries exhausted after {attempt} attempts: {e}"
                        )));
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    fn abort(&mut self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.txn = None;
            Ok(())
        })
    }
}

struct MemoryTxn<'s> {
    state: Arc<RwLock<State>>,
    txn: &'s mut Txn,
}

impl MemoryTxn<'_> {
    fn apply(
        state: &State,
        txn: &Txn,
        ns: &Namespace,
        ops: Vec<WriteOp>,
    ) -> Result<(BTreeMap<String, StampedRecord>, BulkWriteResult), StoreError> {
        let mut staged: BTreeMap<String, StampedRecord> = BTreeMap::new();
        let mut result = BulkWriteResult::default();

        for op in ops {
            let id = op.id().to_string();
            state.conflict(txn.start_version, ns, &id)?;
            let committed = state.get(ns, &id);
            let current = staged
                .get(&id)
                .or_else(|| txn.staged(ns, &id))
                .or(committed.map(|d| &d.record))
                .cloned();

            match op {
                WriteOp::Insert(record) => {
                    if current.is_some() {
                        return Err(StoreError::duplicate_key(format!(
                            "E11000 duplicate key error collection: {ns} dup key: {{ _id: \"{id}\" }}"
                        )));
                    }
                    result.inserted_ids.push(id.clone());
                    staged.insert(id, record);
                }
                WriteOp::Update(record) => {
                    if let Some(current) = current {
                        result.matched += 1;
                        if current != record {
                            result.modified += 1;
                        }
                        staged.insert(id, record);
                    }
                }
                WriteOp::Upsert(record) => match current {
                    Some(current) => {
                        result.matched += 1;
                        if current != record {
                            result.modified += 1;
                        }
                        staged.insert(id, record);
                    }
                    None => {
                        result.upserted_ids.push(id.clone());
                        staged.insert(id, record);
                    }
                },
            }
        }
        Ok((staged, result))
    }
}

impl TxnContext for MemoryTxn<'_> {
    fn bulk_write<'a>(
        &'a mut self,
        ns: &'a Namespace,
        ops: Vec<WriteOp>,
    ) -> BoxFuture<'a, Result<BulkWriteResult, StoreError>> {
        Box::pin(async move {
            let (staged, result) = {
                let state = self.state.read().await;
                Self::apply(&state, &*self.txn, ns, ops)?
            };
            self.txn.writes.entry(ns.clone()).or_default().extend(staged);
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn ns() -> Namespace {
        Namespace::new("test", "bookInfo")
    }

    fn book(id: &str, title: &str) -> StampedRecord {
        StampedRecord {
            id: id.into(),
            title: title.into(),
            author: "Toni Morrison".into(),
            updated_at: 100,
        }
    }

    /// Writes a fixed op list, optionally failing afterwards.
    struct Script {
        ops: Vec<WriteOp>,
        fail_after: bool,
        results: Mutex<Vec<BulkWriteResult>>,
    }

    impl Script {
        fn new(ops: Vec<WriteOp>) -> Self {
            Self { ops, fail_after: false, results: Mutex::new(Vec::new()) }
        }
    }

    impl TxnBody for Script {
        fn run<'a>(&'a self, ctx: &'a mut dyn TxnContext) -> BoxFuture<'a, Result<(), StoreError>> {
            Box::pin(async move {
                let ns = ns();
                let res = ctx.bulk_write(&ns, self.ops.clone()).await?;
                self.results.lock().unwrap().push(res);
                if self.fail_after {
                    return Err(StoreError::aborted("work failed after writing"));
                }
                Ok(())
            })
        }
    }

    /// Session driven by hand, so other transactions can commit while it is open.
    fn raw_session(store: &MemoryStore) -> MemorySession {
        MemorySession {
            state: store.state.clone(),
            faults: store.faults.clone(),
            max_attempts: 1,
            txn: None,
        }
    }

    async fn stage(store: &MemoryStore, raw: &mut MemorySession, ops: Vec<WriteOp>) -> BulkWriteResult {
        let txn = raw.txn.as_mut().unwrap();
        let mut ctx = MemoryTxn { state: store.state.clone(), txn };
        ctx.bulk_write(&ns(), ops).await.unwrap()
    }

    async fn commit(store: &MemoryStore, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut session = store.start_session().await?;
        session.with_transaction(&TxnOptions::majority(), &Script::new(ops)).await
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let store = MemoryStore::new();
        commit(&store, vec![WriteOp::Insert(book("1", "Sula")), WriteOp::Insert(book("2", "Beloved"))])
            .await
            .unwrap();

        assert_eq!(store.count(&ns()).await.unwrap(), 2);
        assert_eq!(store.find(&ns(), "2").await.unwrap().unwrap().title, "Beloved");
    }

    #[tokio::test]
    async fn failed_body_discards_staged_writes() {
        let store = MemoryStore::new();
        let mut script = Script::new(vec![WriteOp::Insert(book("1", "Sula"))]);
        script.fail_after = true;

        let mut session = store.start_session().await.unwrap();
        let err = session.with_transaction(&TxnOptions::majority(), &script).await.unwrap_err();

        assert_eq!(err.kind(), docbatch_api::ErrorKind::Aborted);
        assert_eq!(script.results.lock().unwrap().len(), 1);
        assert_eq!(store.count(&ns()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        commit(&store, vec![WriteOp::Insert(book("2", "Sula"))]).await.unwrap();

        let err = commit(&store, vec![WriteOp::Insert(book("2", "Sula"))]).await.unwrap_err();
        assert_eq!(err.kind(), docbatch_api::ErrorKind::DuplicateKey);

        let err = commit(&store, vec![WriteOp::Insert(book("5", "A")), WriteOp::Insert(book("5", "B"))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), docbatch_api::ErrorKind::DuplicateKey);
        assert_eq!(store.count(&ns()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_and_upsert_semantics() {
        let store = MemoryStore::new();
        commit(&store, vec![WriteOp::Insert(book("1", "Sula"))]).await.unwrap();

        let script = Script::new(vec![
            WriteOp::Update(book("1", "Sula (revised)")),
            WriteOp::Update(book("9", "Missing")),
            WriteOp::Upsert(book("3", "Song of Solomon")),
        ]);
        let mut session = store.start_session().await.unwrap();
        session.with_transaction(&TxnOptions::majority(), &script).await.unwrap();

        let results = script.results.lock().unwrap();
        assert_eq!(results[0].matched, 1);
        assert_eq!(results[0].modified, 1);
        assert_eq!(results[0].upserted_ids, vec!["3".to_string()]);
        assert!(store.find(&ns(), "9").await.unwrap().is_none());
        assert_eq!(store.find(&ns(), "1").await.unwrap().unwrap().title, "Sula (revised)");
        assert_eq!(store.count(&ns()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_commit_causes_conflict() {
        let store = MemoryStore::new();

        let mut raw = raw_session(&store);
        raw.begin().await;
        stage(&store, &mut raw, vec![WriteOp::Upsert(book("1", "mine"))]).await;

        commit(&store, vec![WriteOp::Insert(book("1", "theirs"))]).await.unwrap();

        let err = raw.commit().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.find(&ns(), "1").await.unwrap().unwrap().title, "theirs");
    }

    #[tokio::test]
    async fn concurrent_clear_conflicts_with_staged_update() {
        let store = MemoryStore::new();
        commit(&store, vec![WriteOp::Insert(book("1", "Sula"))]).await.unwrap();

        let mut raw = raw_session(&store);
        raw.begin().await;
        let staged = stage(&store, &mut raw, vec![WriteOp::Update(book("1", "Sula (revised)"))]).await;
        assert_eq!(staged.matched, 1);

        assert_eq!(store.clear(&ns()).await.unwrap(), 1);

        let err = raw.commit().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.count(&ns()).await.unwrap(), 0);

        // A fresh transaction sees the clear: the update matches nothing.
        let script = Script::new(vec![WriteOp::Update(book("1", "Sula (revised)"))]);
        let mut session = store.start_session().await.unwrap();
        session.with_transaction(&TxnOptions::majority(), &script).await.unwrap();
        assert_eq!(script.results.lock().unwrap()[0].matched, 0);
        assert_eq!(store.count(&ns()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleared_ids_can_be_inserted_again() {
        let store = MemoryStore::new();
        commit(&store, vec![WriteOp::Insert(book("1", "Sula"))]).await.unwrap();
        store.clear(&ns()).await.unwrap();

        commit(&store, vec![WriteOp::Insert(book("1", "Sula"))]).await.unwrap();
        assert_eq!(store.count(&ns()).await.unwrap(), 1);

        // The tombstone is gone once the id is written again.
        let mut raw = raw_session(&store);
        raw.begin().await;
        stage(&store, &mut raw, vec![WriteOp::Update(book("1", "Sula (revised)"))]).await;
        raw.commit().await.unwrap();
        assert_eq!(store.find(&ns(), "1").await.unwrap().unwrap().title, "Sula (revised)");
    }

    #[tokio::test]
    async fn injected_conflicts_are_retried() {
        let store = MemoryStore::new();
        store.inject_commit_conflicts(2);

        let script = Script::new(vec![WriteOp::Insert(book("1", "Sula"))]);
        let mut session = store.start_session().await.unwrap();
        session.with_transaction(&TxnOptions::majority(), &script).await.unwrap();

        assert_eq!(script.results.lock().unwrap().len(), 3);
        assert_eq!(store.count(&ns()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_transaction() {
        let store = MemoryStore::from_config(MemoryStoreConfig { max_attempts: 2 });
        store.inject_commit_conflicts(10);

        let err = commit(&store, vec![WriteOp::Insert(book("1", "Sula"))]).await.unwrap_err();
        assert_eq!(err.kind(), docbatch_api::ErrorKind::Transaction);
        assert_eq!(store.count(&ns()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_refuses_sessions() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.start_session().await.err().unwrap();
        assert_eq!(err.kind(), docbatch_api::ErrorKind::Session);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = MemoryStore::new();
        commit(&store, vec![WriteOp::Insert(book("1", "a")), WriteOp::Insert(book("2", "b"))])
            .await
            .unwrap();
        assert_eq!(store.clear(&ns()).await.unwrap(), 2);
        assert_eq!(store.count(&ns()).await.unwrap(), 0);
        assert!(store.snapshot(&ns()).await.is_empty());
    }
}
