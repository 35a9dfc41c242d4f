//! Workspace store - transactional view over a key-value backend
//!
//! Each transaction loads both records, hands out a mutable [`Snapshot`], and
//! writes back only if something changed and the stored version still equals
//! the version seen at load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mirror_core::{MirrorError, MirrorResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{trace, warn};

use crate::{ReverseIndex, Snapshot, Workspace};

/// Key of the workspace record
pub const WORKSPACE_KEY: &str = "workspace";
/// Key of the reverse index record
pub const REVERSE_INDEX_KEY: &str = "reverseIndex";

/// Durable key-value storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> MirrorResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> MirrorResult<()>;

    async fn remove(&self, key: &str) -> MirrorResult<()>;

    async fn clear(&self) -> MirrorResult<()>;
}

/// In-memory store, lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> MirrorResult<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> MirrorResult<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> MirrorResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> MirrorResult<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Store backed by a single JSON document on disk.
///
/// Writes go to a sibling temp file that is renamed over the document, so a
/// crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> MirrorResult<serde_json::Map<String, Value>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new())
            }
            Err(e) => return Err(MirrorError::Store(e.to_string())),
        };
        if bytes.is_empty() {
            return Ok(serde_json::Map::new());
        }
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(MirrorError::Codec(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(MirrorError::Codec(e.to_string())),
        }
    }

    async fn write_document(&self, document: serde_json::Map<String, Value>) -> MirrorResult<()> {
        let bytes = serde_json::to_vec_pretty(&Value::Object(document))
            .map_err(|e| MirrorError::Codec(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| MirrorError::Store(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| MirrorError::Store(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> MirrorResult<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> MirrorResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), value);
        self.write_document(document).await
    }

    async fn remove(&self, key: &str) -> MirrorResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        if document.remove(key).is_some() {
            self.write_document(document).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> MirrorResult<()> {
        let _guard = self.lock.lock().await;
        self.write_document(serde_json::Map::new()).await
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> MirrorResult<Option<Value>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> MirrorResult<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> MirrorResult<()> {
        (**self).remove(key).await
    }

    async fn clear(&self) -> MirrorResult<()> {
        (**self).clear().await
    }
}

/// An open read-modify-write transaction
#[derive(Debug)]
pub struct Transaction {
    /// Working copy; mutate freely, then hand back to [`WorkspaceStore::commit`]
    pub snapshot: Snapshot,
    loaded: Snapshot,
}

impl Transaction {
    /// Version of the workspace record when the transaction began
    pub fn base_version(&self) -> u64 {
        self.loaded.workspace.version
    }

    pub fn is_dirty(&self) -> bool {
        self.snapshot != self.loaded
    }
}

/// Owner of the persisted workspace and reverse index
#[derive(Debug)]
pub struct WorkspaceStore<S> {
    backend: S,
}

impl<S: KeyValueStore> WorkspaceStore<S> {
    pub fn new(backend: S) -> Self {
        WorkspaceStore { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Read-only load of both records
    pub async fn load(&self) -> MirrorResult<Snapshot> {
        let workspace: Workspace = self.read_record(WORKSPACE_KEY).await?;
        let reverse: ReverseIndex = self.read_record(REVERSE_INDEX_KEY).await?;
        Ok(Snapshot { workspace, reverse })
    }

    /// Start a transaction
    pub async fn begin(&self) -> MirrorResult<Transaction> {
        let loaded = self.load().await?;
        Ok(Transaction {
            snapshot: loaded.clone(),
            loaded,
        })
    }

    /// Persist a transaction.
    ///
    /// Returns whether anything was written. Fails with
    /// [`MirrorError::StaleTransaction`] when the records were replaced since
    /// the transaction began.
    pub async fn commit(&self, txn: Transaction) -> MirrorResult<bool> {
        if !txn.is_dirty() {
            return Ok(false);
        }

        let expected = txn.base_version();
        let current: Workspace = self.read_record(WORKSPACE_KEY).await?;
        if current.version != expected {
            return Err(MirrorError::StaleTransaction {
                expected,
                found: current.version,
            });
        }

        let mut snapshot = txn.snapshot;
        snapshot.workspace.version = expected + 1;
        self.write_snapshot(&snapshot).await?;
        trace!(
            version = snapshot.workspace.version,
            entities = snapshot.len(),
            "workspace committed"
        );
        Ok(true)
    }

    /// Run a synchronous body inside a transaction and commit it
    pub async fn transact<F, R>(&self, f: F) -> MirrorResult<R>
    where
        F: FnOnce(&mut Snapshot) -> R,
    {
        let mut txn = self.begin().await?;
        let out = f(&mut txn.snapshot);
        self.commit(txn).await?;
        Ok(out)
    }

    /// Discard both persisted records
    pub async fn reset(&self) -> MirrorResult<()> {
        self.backend.remove(WORKSPACE_KEY).await?;
        self.backend.remove(REVERSE_INDEX_KEY).await
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> MirrorResult<()> {
        let workspace = serde_json::to_value(&snapshot.workspace)
            .map_err(|e| MirrorError::Codec(e.to_string()))?;
        let reverse = serde_json::to_value(&snapshot.reverse)
            .map_err(|e| MirrorError::Codec(e.to_string()))?;
        self.backend.set(WORKSPACE_KEY, workspace).await?;
        self.backend.set(REVERSE_INDEX_KEY, reverse).await
    }

    async fn read_record<T: DeserializeOwned + Default>(&self, key: &str) -> MirrorResult<T> {
        let Some(value) = self.backend.get(key).await? else {
            return Ok(T::default());
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(key, error = %e, "undecodable record, starting empty");
                Ok(T::default())
            }
        }
    }
}
