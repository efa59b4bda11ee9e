#[cfg(feature = "couch-store")]
pub mod couchdb;
mod file;
mod memory;

use futures::future::BoxFuture;

use crate::dao::storage::StorageResult;

pub use file::FileKvStore;
pub use memory::MemoryKvStore;

/// Abstraction over a string-keyed, string-valued persistent store.
pub trait KeyValueStore: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Write several entries as one unit where the backend allows it.
    fn put_all(&self, entries: Vec<(String, String)>) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
