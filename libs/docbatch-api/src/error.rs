use std::fmt;

/// Category of a store error. Lets the transaction layer decide whether
/// an attempt may be retried or must surface to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store unreachable. Fatal at startup.
    Connection,
    /// Session or transaction could not be started.
    Session,
    /// Concurrent modification of the same document. Transient, retried.
    WriteConflict,
    /// Primary-key constraint violated.
    DuplicateKey,
    /// Commit/abort failed or retries exhausted.
    Transaction,
    /// The unit of work itself failed; the transaction was aborted.
    Aborted,
    /// Document could not be encoded/decoded.
    Encoding,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => f.write_str("connection"),
            ErrorKind::Session => f.write_str("session"),
            ErrorKind::WriteConflict => f.write_str("write conflict"),
            ErrorKind::DuplicateKey => f.write_str("duplicate key"),
            ErrorKind::Transaction => f.write_str("transaction"),
            ErrorKind::Aborted => f.write_str("aborted"),
            ErrorKind::Encoding => f.write_str("encoding"),
            ErrorKind::Other => f.write_str("other"),
        }
    }
}

/// Error returned by every store trait method.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `Clone` so that a transaction body can hand a copy to the store's retry
/// policy while the caller keeps the original.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, msg)
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, msg)
    }

    pub fn write_conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::WriteConflict, msg)
    }

    pub fn duplicate_key(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateKey, msg)
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, msg)
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, msg)
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encoding, msg)
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the whole transaction may be retried from the start.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::WriteConflict
    }

    /// Add context to the error, preserving the original kind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Debug for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}
