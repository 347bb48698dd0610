pub mod error;
pub mod record;
pub mod storage;
pub mod util;

pub use error::{ErrorKind, StoreError};
pub use record::{Record, RecordId, StampedRecord};
pub use storage::{
    BoxFuture, BulkWriteResult, DocumentStore, Namespace, StoreSession, TxnBody, TxnContext,
    TxnOptions, WriteConcern, WriteOp,
};
pub use util::now_secs;
