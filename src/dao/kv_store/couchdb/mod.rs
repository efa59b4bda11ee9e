pub mod config;
pub mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use store::CouchKvStore;
