use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::{fs, sync::Mutex};
use tracing::warn;

use super::KeyValueStore;
use crate::dao::storage::{StorageError, StorageResult};

type Entries = IndexMap<String, String>;

/// Store persisting every entry into a single JSON object file.
///
/// Writes go through a temporary sibling file followed by a rename so a crash
/// mid-write leaves the previous contents intact.
#[derive(Clone)]
pub struct FileKvStore {
    path: Arc<PathBuf>,
    write_gate: Arc<Mutex<()>>,
}

impl FileKvStore {
    /// Store backed by the JSON file at `path`, created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> StorageResult<Entries> {
        match fs::read(self.path.as_ref()).await {
            Ok(bytes) => parse_entries(&bytes).map_err(|source| {
                StorageError::unavailable(
                    format!("corrupt store file `{}`", self.path.display()),
                    source,
                )
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Entries::new()),
            Err(err) => Err(StorageError::unavailable(
                format!("failed to read `{}`", self.path.display()),
                err,
            )),
        }
    }

    async fn write_entries(&self, entries: &Entries) -> StorageResult<()> {
        let path = self.path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|err| {
                StorageError::unavailable(format!("failed to create `{}`", parent.display()), err)
            })?;
        }

        let payload = serde_json::to_vec_pretty(entries).map_err(|source| {
            StorageError::unavailable("failed to encode store file".into(), source)
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, payload).await.map_err(|err| {
            StorageError::unavailable(format!("failed to write `{}`", tmp.display()), err)
        })?;
        fs::rename(&tmp, path).await.map_err(|err| {
            StorageError::unavailable(format!("failed to replace `{}`", path.display()), err)
        })
    }

    async fn merge(&self, updates: Vec<(String, String)>) -> StorageResult<()> {
        let _gate = self.write_gate.lock().await;
        let path = self.path.as_ref();
        let mut entries = match fs::read(path).await {
            Ok(bytes) => parse_entries(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "corrupt store file; rewriting from scratch");
                Entries::new()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Entries::new(),
            Err(err) => {
                return Err(StorageError::unavailable(
                    format!("failed to read `{}`", path.display()),
                    err,
                ));
            }
        };
        entries.extend(updates);
        self.write_entries(&entries).await
    }
}

fn parse_entries(bytes: &[u8]) -> serde_json::Result<Entries> {
    if bytes.is_empty() {
        Ok(Entries::new())
    } else {
        serde_json::from_slice(bytes)
    }
}

impl KeyValueStore for FileKvStore {
    fn name(&self) -> &str {
        "file"
    }

    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { Ok(store.read_entries().await?.get(&key).cloned()) })
    }

    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { store.merge(vec![(key, value)]).await })
    }

    fn put_all(&self, entries: Vec<(String, String)>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.merge(entries).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.read_entries().await.map(|_| ()) })
    }
}
