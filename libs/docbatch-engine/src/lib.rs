pub mod config;
pub mod error;
pub mod ids;
pub mod runner;
pub mod writer;

pub use config::RunnerConfig;
pub use error::{TxnError, TxnErrorKind};
pub use ids::{IdError, IdGenerator, UuidGenerator};
pub use runner::{TransactionRunner, UnitOfWork};
pub use writer::{BatchWriter, Clock, SystemClock, WriteKind};
