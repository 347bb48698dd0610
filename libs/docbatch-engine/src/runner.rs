use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::Instrument;

use docbatch_api::{BoxFuture, DocumentStore, ErrorKind, StoreError, StoreSession, TxnBody, TxnContext, TxnOptions};

use crate::config::RunnerConfig;
use crate::error::TxnError;

/// A unit of work executed inside one transaction.
///
/// May run more than once if the store retries a transient failure, so
/// implementations must not assume a single invocation.
pub trait UnitOfWork: Send + Sync {
    type Output: Send;

    fn run<'a>(&'a self, ctx: &'a mut dyn TxnContext) -> BoxFuture<'a, Result<Self::Output, TxnError>>;
}

/// Adapter for closures passed to `TransactionRunner::run_fn`.
struct FnWork<F, R>(F, PhantomData<fn() -> R>);

impl<F, R> UnitOfWork for FnWork<F, R>
where
    F: for<'a> Fn(&'a mut dyn TxnContext) -> BoxFuture<'a, Result<R, TxnError>> + Send + Sync,
    R: Send,
{
    type Output = R;

    fn run<'a>(&'a self, ctx: &'a mut dyn TxnContext) -> BoxFuture<'a, Result<R, TxnError>> {
        (self.0)(ctx)
    }
}

/// Runs units of work as atomic transactions committed with the
/// configured write concern (majority by default).
///
/// Retrying transient failures is left to the store session; the runner
/// only opens the session, hands the work over and reports the outcome.
pub struct TransactionRunner {
    store: Arc<dyn DocumentStore>,
    options: TxnOptions,
    deadline: Option<Duration>,
    span: tracing::Span,
}

impl TransactionRunner {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            options: TxnOptions::majority(),
            deadline: None,
            span: tracing::info_span!("txn"),
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &RunnerConfig) -> Self {
        let runner = Self::new(store).with_options(config.options());
        match config.deadline() {
            Some(deadline) => runner.with_deadline(deadline),
            None => runner,
        }
    }

    pub fn with_options(mut self, options: TxnOptions) -> Self {
        self.options = options;
        self
    }

    /// Abort and fail with `Timeout` if the transaction has not committed
    /// within `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Span all transaction events are recorded under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn options(&self) -> &TxnOptions {
        &self.options
    }

    pub async fn run<W: UnitOfWork>(&self, work: &W) -> Result<W::Output, TxnError> {
        self.execute(work).instrument(self.span.clone()).await
    }

    /// Like `run`, for a closure returning a boxed future:
    ///
    /// ```ignore
    /// runner.run_fn(|ctx| {
    ///     let writer = writer.clone();
    ///     let books = books.clone();
    ///     Box::pin(async move { writer.write_all(ctx, books).await })
    /// }).await?;
    /// ```
    pub async fn run_fn<F, R>(&self, f: F) -> Result<R, TxnError>
    where
        F: for<'a> Fn(&'a mut dyn TxnContext) -> BoxFuture<'a, Result<R, TxnError>> + Send + Sync,
        R: Send,
    {
        self.run(&FnWork(f, PhantomData)).await
    }

    async fn execute<W: UnitOfWork>(&self, work: &W) -> Result<W::Output, TxnError> {
        let session = self
            .store
            .start_session()
            .await
            .map_err(|e| TxnError::from(e).with_context("failed to start session"))?;
        let mut guard = SessionGuard::open(session);

        let body = SlotBody::new(work);
        let attempt = guard.session.with_transaction(&self.options, &body);
        let committed = match self.deadline {
            Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| limit),
            None => Ok(attempt.await),
        };

        let result = match committed {
            Ok(Ok(())) => body.take_output(),
            Ok(Err(e)) => Err(body.take_error(e)),
            Err(limit) => {
                if let Err(e) = guard.session.abort().await {
                    tracing::warn!(error = %e, "abort after deadline failed");
                }
                Err(TxnError::Timeout(limit))
            }
        };

        match &result {
            Ok(_) => tracing::info!("transaction committed"),
            Err(e) => tracing::warn!(error = %e, "transaction failed"),
        }
        result.map_err(|e| e.with_context("failed to transact"))
    }
}

/// Owns the session for the duration of one `run`; logs its end on every
/// exit path, including unwinding.
struct SessionGuard {
    session: Box<dyn StoreSession>,
}

impl SessionGuard {
    fn open(session: Box<dyn StoreSession>) -> Self {
        tracing::info!("start session");
        Self { session }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        tracing::info!("end session");
    }
}

/// Type-erases a `UnitOfWork` for the store and keeps the outcome of the
/// latest attempt, so the caller gets the work's own error back rather
/// than the store's copy of it.
struct SlotBody<'w, W: UnitOfWork> {
    work: &'w W,
    slot: Mutex<Option<Result<W::Output, TxnError>>>,
}

impl<'w, W: UnitOfWork> SlotBody<'w, W> {
    fn new(work: &'w W) -> Self {
        Self {
            work,
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Result<W::Output, TxnError>>> {
        match self.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("transaction result slot was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn take_output(&self) -> Result<W::Output, TxnError> {
        match self.lock().take() {
            Some(outcome) => outcome,
            None => Err(TxnError::TransactionFailed(StoreError::transaction(
                "store committed without running the unit of work",
            ))),
        }
    }

    fn take_error(&self, store_err: StoreError) -> TxnError {
        if store_err.kind() == ErrorKind::Transaction {
            return TxnError::TransactionFailed(store_err);
        }
        match self.lock().take() {
            Some(Err(work_err)) => work_err,
            _ => TxnError::from(store_err),
        }
    }
}

impl<W: UnitOfWork> TxnBody for SlotBody<'_, W> {
    fn run<'a>(&'a self, ctx: &'a mut dyn TxnContext) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let outcome = self.work.run(ctx).await;
            let reply = match &outcome {
                Ok(_) => Ok(()),
                Err(e) => Err(e
                    .store_error()
                    .cloned()
                    .unwrap_or_else(|| StoreError::aborted(e.to_string()))),
            };
            *self.lock() = Some(outcome);
            reply
        })
    }
}
