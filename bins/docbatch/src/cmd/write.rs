use std::sync::Arc;

use docbatch_api::{BulkWriteResult, DocumentStore, Namespace};
use docbatch_engine::{BatchWriter, TransactionRunner};

use super::config::Effective;
use super::domain::sample_books;
use super::error::DocbatchError;
use super::store::open_store;

pub async fn run(eff: &Effective) -> Result<(), DocbatchError> {
    let store = open_store(eff).await?;
    run_with_store(store, eff).await?;
    Ok(())
}

/// Optionally clear the collection, then write the sample batch in one
/// transaction. Returns the acknowledgement of the committed write.
pub async fn run_with_store(
    store: Arc<dyn DocumentStore>,
    eff: &Effective,
) -> Result<BulkWriteResult, DocbatchError> {
    let ns = Namespace::new(eff.database.as_str(), eff.collection.as_str());

    if eff.deleted {
        let removed = store.clear(&ns).await?;
        tracing::info!(namespace = %ns, removed, "deleted");
    }

    let runner = TransactionRunner::from_config(store.clone(), &eff.transaction)
        .with_span(tracing::info_span!("txn", namespace = %ns, kind = %eff.kind));
    let writer = BatchWriter::new(ns.clone());
    let kind = eff.kind;
    let pause = eff.pause;

    let outcome = runner
        .run_fn(|ctx| {
            let writer = writer.clone();
            Box::pin(async move {
                let result = writer.write_all_as(ctx, sample_books(), kind).await?;
                if !pause.is_zero() {
                    tracing::info!(pause_ms = pause.as_millis() as u64, "holding transaction open");
                    tokio::time::sleep(pause).await;
                }
                Ok(result)
            })
        })
        .await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(namespace = %ns, error = %e, "failed to insert");
            return Err(e.into());
        }
    };

    let total = store.count(&ns).await?;
    tracing::info!(namespace = %ns, created = result.created(), matched = result.matched, total, "batch committed");
    Ok(result)
}
