use std::time::Duration;

use docbatch_api::{ErrorKind, StoreError};

/// Category of a `TxnError`, independent of any context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnErrorKind {
    Connection,
    Session,
    WriteConflict,
    TransactionFailed,
    Write,
    Validation,
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    #[error("connection error: {0}")]
    Connection(#[source] StoreError),

    #[error("session error: {0}")]
    Session(#[source] StoreError),

    #[error("write conflict: {0}")]
    WriteConflict(#[source] StoreError),

    #[error("transaction failed: {0}")]
    TransactionFailed(#[source] StoreError),

    #[error("write failed: {0}")]
    Write(#[source] StoreError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<TxnError>,
    },
}

impl TxnError {
    /// Add context to the error. `kind()` still reports the inner kind.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        TxnError::Context {
            context: ctx.to_string(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> TxnErrorKind {
        match self {
            TxnError::Connection(_) => TxnErrorKind::Connection,
            TxnError::Session(_) => TxnErrorKind::Session,
            TxnError::WriteConflict(_) => TxnErrorKind::WriteConflict,
            TxnError::TransactionFailed(_) => TxnErrorKind::TransactionFailed,
            TxnError::Write(_) => TxnErrorKind::Write,
            TxnError::Validation(_) => TxnErrorKind::Validation,
            TxnError::Timeout(_) => TxnErrorKind::Timeout,
            TxnError::Context { source, .. } => source.kind(),
        }
    }

    /// The store error at the root of this error, if there is one.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            TxnError::Connection(e)
            | TxnError::Session(e)
            | TxnError::WriteConflict(e)
            | TxnError::TransactionFailed(e)
            | TxnError::Write(e) => Some(e),
            TxnError::Validation(_) | TxnError::Timeout(_) => None,
            TxnError::Context { source, .. } => source.store_error(),
        }
    }
}

impl From<StoreError> for TxnError {
    fn from(e: StoreError) -> Self {
        match e.kind() {
            ErrorKind::Connection => TxnError::Connection(e),
            ErrorKind::Session => TxnError::Session(e),
            ErrorKind::WriteConflict => TxnError::WriteConflict(e),
            ErrorKind::Transaction | ErrorKind::Aborted => TxnError::TransactionFailed(e),
            ErrorKind::DuplicateKey | ErrorKind::Encoding | ErrorKind::Other => TxnError::Write(e),
        }
    }
}
