use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::BoxFuture;

use super::KeyValueStore;
use crate::dao::storage::{StorageError, StorageResult};

/// Volatile store backed by a concurrent map.
///
/// Can be switched offline to exercise the degraded persistence paths.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<DashMap<String, String>>,
    offline: Arc<AtomicBool>,
}

impl MemoryKvStore {
    /// Empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated unavailability.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Raw access for seeding and inspecting entries.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    /// Stored value for `key`, bypassing the offline switch.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(
                "memory store offline".into(),
                io::Error::new(io::ErrorKind::NotConnected, "offline"),
            ))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryKvStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let result = self.ensure_online().map(|()| self.raw(key));
        Box::pin(async move { result })
    }

    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.ensure_online().map(|()| {
            self.entries.insert(key.to_string(), value);
        });
        Box::pin(async move { result })
    }

    fn put_all(&self, entries: Vec<(String, String)>) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.ensure_online().map(|()| {
            for (key, value) in entries {
                self.entries.insert(key, value);
            }
        });
        Box::pin(async move { result })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.ensure_online();
        Box::pin(async move { result })
    }
}
