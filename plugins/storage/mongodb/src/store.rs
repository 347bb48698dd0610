use std::time::Duration;

use mongodb::bson::{doc, to_document};
use mongodb::error::Error;
use mongodb::options::{Acknowledgment, ClientOptions, TransactionOptions, WriteConcern as MongoWriteConcern};
use mongodb::{Client, ClientSession, Collection};

use docbatch_api::{
    BoxFuture, BulkWriteResult, DocumentStore, Namespace, StampedRecord, StoreError, StoreSession,
    TxnBody, TxnContext, TxnOptions, WriteConcern, WriteOp,
};

use crate::config::MongoStoreConfig;
use crate::error::{from_driver, into_driver, store_error};

// ════════════════════════════════════════════════════════════════
//  MongoStore
// ════════════════════════════════════════════════════════════════

/// Document store backed by a MongoDB replica set (transactions need one).
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Connect and ping the server, so an unreachable store fails here
    /// instead of on the first write.
    pub async fn connect(config: &MongoStoreConfig) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| StoreError::connection(format!("parse uri '{}': {e}", config.uri)))?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        options.app_name = Some(config.app_name.clone());
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options).map_err(|e| StoreError::connection(e.to_string()))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::connection(format!("ping {}: {e}", config.uri)))?;

        tracing::info!(uri = %config.uri, "connected to mongodb");
        Ok(Self { client })
    }

    fn collection(&self, ns: &Namespace) -> Collection<StampedRecord> {
        collection(&self.client, ns)
    }
}

fn collection(client: &Client, ns: &Namespace) -> Collection<StampedRecord> {
    client.database(&ns.database).collection(&ns.collection)
}

impl DocumentStore for MongoStore {
    fn start_session(&self) -> BoxFuture<'_, Result<Box<dyn StoreSession>, StoreError>> {
        Box::pin(async move {
            let session = self
                .client
                .start_session()
                .await
                .map_err(|e| StoreError::session(e.to_string()))?;
            let session: Box<dyn StoreSession> = Box::new(MongoSession {
                client: self.client.clone(),
                session,
                active: false,
            });
            Ok(session)
        })
    }

    fn clear<'a>(&'a self, ns: &'a Namespace) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let res = self
                .collection(ns)
                .delete_many(doc! {})
                .await
                .map_err(|e| store_error(&e))?;
            Ok(res.deleted_count)
        })
    }

    fn count<'a>(&'a self, ns: &'a Namespace) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            self.collection(ns)
                .count_documents(doc! {})
                .await
                .map_err(|e| store_error(&e))
        })
    }

    fn find<'a>(
        &'a self,
        ns: &'a Namespace,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<StampedRecord>, StoreError>> {
        Box::pin(async move {
            self.collection(ns)
                .find_one(doc! { "_id": id })
                .await
                .map_err(|e| store_error(&e))
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Session
// ════════════════════════════════════════════════════════════════

fn transaction_options(options: &TxnOptions) -> TransactionOptions {
    let mut write_concern = MongoWriteConcern::default();
    write_concern.w = Some(match options.write_concern {
        WriteConcern::Majority => Acknowledgment::Majority,
        WriteConcern::Nodes(n) => Acknowledgment::Nodes(n),
    });

    let mut txn = TransactionOptions::default();
    txn.write_concern = Some(write_concern);
    txn.max_commit_time = options.max_commit_time;
    txn
}

/// Dropping the driver session ends it; an open transaction is aborted by
/// the driver at that point. `active` stays set when a transaction future is
/// dropped midway, so `abort` knows there is something to abort.
struct MongoSession {
    client: Client,
    session: ClientSession,
    active: bool,
}

impl MongoSession {
    async fn abort_active(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.session.abort_transaction().await {
            tracing::debug!(error = %e, "abort transaction failed");
        }
    }
}

impl StoreSession for MongoSession {
    /// Runs `body` through the driver's convenient transaction API, which
    /// owns the retry policy (transient errors, unknown commit results).
    fn with_transaction<'a>(
        &'a mut self,
        options: &'a TxnOptions,
        body: &'a dyn TxnBody,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.active = true;
            let outcome = self
                .session
                .start_transaction()
                .with_options(transaction_options(options))
                .and_run((&self.client, body), |session, (client, body)| {
                    let client: &Client = *client;
                    let body: &dyn TxnBody = *body;
                    Box::pin(async move {
                        let mut ctx = MongoTxn {
                            client,
                            session,
                            driver_error: None,
                        };
                        match body.run(&mut ctx).await {
                            Ok(()) => Ok(()),
                            Err(e) => Err(into_driver(e, ctx.driver_error.take())),
                        }
                    })
                })
                .await;
            self.active = false;
            outcome.map_err(from_driver)
        })
    }

    fn abort(&mut self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.abort_active().await;
            Ok(())
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Transaction context
// ════════════════════════════════════════════════════════════════

struct MongoTxn<'s> {
    client: &'s Client,
    session: &'s mut ClientSession,
    /// Last driver error, kept for its labels.
    driver_error: Option<Error>,
}

impl MongoTxn<'_> {
    fn fail(&mut self, err: Error) -> StoreError {
        let mapped = store_error(&err);
        self.driver_error = Some(err);
        mapped
    }

    /// All-insert batches go out as a single ordered `insertMany`.
    async fn insert_many(
        &mut self,
        coll: &Collection<StampedRecord>,
        records: Vec<StampedRecord>,
    ) -> Result<BulkWriteResult, StoreError> {
        let ids = records.iter().map(|r| r.id.clone()).collect();
        let res = coll.insert_many(records).ordered(true).session(&mut *self.session).await;
        res.map_err(|e| self.fail(e))?;
        Ok(BulkWriteResult {
            inserted_ids: ids,
            ..BulkWriteResult::default()
        })
    }

    async fn apply(
        &mut self,
        coll: &Collection<StampedRecord>,
        op: WriteOp,
        result: &mut BulkWriteResult,
    ) -> Result<(), StoreError> {
        match op {
            WriteOp::Insert(record) => {
                let res = coll.insert_one(&record).session(&mut *self.session).await;
                res.map_err(|e| self.fail(e))?;
                result.inserted_ids.push(record.id);
            }
            WriteOp::Update(record) => {
                let mut fields = to_document(&record).map_err(|e| StoreError::encoding(e.to_string()))?;
                fields.remove("_id");
                let res = coll
                    .update_one(doc! { "_id": record.id.as_str() }, doc! { "$set": fields })
                    .session(&mut *self.session)
                    .await;
                let res = res.map_err(|e| self.fail(e))?;
                result.matched += res.matched_count;
                result.modified += res.modified_count;
            }
            WriteOp::Upsert(record) => {
                let res = coll
                    .replace_one(doc! { "_id": record.id.as_str() }, &record)
                    .upsert(true)
                    .session(&mut *self.session)
                    .await;
                let res = res.map_err(|e| self.fail(e))?;
                result.matched += res.matched_count;
                result.modified += res.modified_count;
                if res.upserted_id.is_some() {
                    result.upserted_ids.push(record.id);
                }
            }
        }
        Ok(())
    }
}

impl TxnContext for MongoTxn<'_> {
    fn bulk_write<'a>(
        &'a mut self,
        ns: &'a Namespace,
        ops: Vec<WriteOp>,
    ) -> BoxFuture<'a, Result<BulkWriteResult, StoreError>> {
        Box::pin(async move {
            let coll = collection(self.client, ns);
            if ops.iter().all(WriteOp::is_insert) {
                let records = ops.into_iter().map(WriteOp::into_record).collect();
                return self.insert_many(&coll, records).await;
            }

            let mut result = BulkWriteResult::default();
            for op in ops {
                self.apply(&coll, op, &mut result).await?;
            }
            Ok(result)
        })
    }
}
