use docbatch_api::StoreError;
use docbatch_engine::TxnError;

#[derive(Debug, thiserror::Error)]
pub enum DocbatchError {
    #[error("config: {0}")]
    Config(String),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Txn(#[from] TxnError),
}
