mod config;
mod error;
mod store;

pub use config::MongoStoreConfig;
pub use store::MongoStore;
