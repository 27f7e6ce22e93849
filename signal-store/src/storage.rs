// Record Store
// Named collections persisted as whole objects with atomic replace semantics

use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Logical collections kept by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Signals,
    History,
    Feedback,
    Lessons,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Signals => "signals",
            Collection::History => "history",
            Collection::Feedback => "feedback",
            Collection::Lessons => "lessons",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Collection::Signals => "signals.json",
            Collection::History => "history.json",
            Collection::Feedback => "feedback.json",
            Collection::Lessons => "lessons.json",
        }
    }

    fn index(&self) -> usize {
        match self {
            Collection::Signals => 0,
            Collection::History => 1,
            Collection::Feedback => 2,
            Collection::Lessons => 3,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trait for storage backends
///
/// Backends move raw serialized collections; decoding and load-time
/// defaulting live in [`RecordStore`].
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Raw contents of a collection, `None` if it was never written
    async fn load(&self, collection: Collection) -> StoreResult<Option<String>>;

    /// Replace a collection's contents. Readers see either the old or the new
    /// contents, never a mix.
    async fn replace(&self, collection: Collection, contents: String) -> StoreResult<()>;
}

/// One pretty-printed JSON file per collection
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// Open (and create if needed) the data directory
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::DataDir {
                path: dir.clone(),
                source,
            })?;
        debug!("Opened JSON store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, collection: Collection) -> PathBuf {
        self.dir.join(collection.file_name())
    }

    async fn write_temp(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for JsonFileBackend {
    async fn load(&self, collection: Collection) -> StoreResult<Option<String>> {
        match tokio::fs::read_to_string(self.path(collection)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::StorageUnavailable { collection, source }),
        }
    }

    async fn replace(&self, collection: Collection, contents: String) -> StoreResult<()> {
        let path = self.path(collection);
        // Unique temp name so two writers never share a half-written file
        let temp_path = self
            .dir
            .join(format!("{}.{}.tmp", collection.file_name(), Uuid::new_v4().simple()));

        if let Err(source) = Self::write_temp(&temp_path, contents.as_bytes()).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::StorageUnavailable { collection, source });
        }

        if let Err(source) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::StorageUnavailable { collection, source });
        }

        Ok(())
    }
}

/// In-memory backend (for testing and embedding)
#[derive(Default)]
pub struct InMemoryBackend {
    collections: RwLock<HashMap<Collection, String>>,
    failing_writes: RwLock<HashSet<Collection>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `collection` fail until switched off again
    pub async fn fail_writes(&self, collection: Collection, failing: bool) {
        let mut failing_writes = self.failing_writes.write().await;
        if failing {
            failing_writes.insert(collection);
        } else {
            failing_writes.remove(&collection);
        }
    }

    /// Overwrite a collection's raw contents, bypassing the store
    pub async fn put_raw(&self, collection: Collection, contents: impl Into<String>) {
        self.collections
            .write()
            .await
            .insert(collection, contents.into());
    }

    pub async fn raw(&self, collection: Collection) -> Option<String> {
        self.collections.read().await.get(&collection).cloned()
    }
}

#[async_trait::async_trait]
impl StorageBackend for InMemoryBackend {
    async fn load(&self, collection: Collection) -> StoreResult<Option<String>> {
        Ok(self.collections.read().await.get(&collection).cloned())
    }

    async fn replace(&self, collection: Collection, contents: String) -> StoreResult<()> {
        if self.failing_writes.read().await.contains(&collection) {
            return Err(StoreError::StorageUnavailable {
                collection,
                source: std::io::Error::new(std::io::ErrorKind::Other, "write disabled"),
            });
        }
        self.collections.write().await.insert(collection, contents);
        Ok(())
    }
}

/// Typed access to collections on top of a backend.
///
/// Each collection has its own async mutex. Components take it around a
/// read-modify-write cycle, so writers inside one process never lose each
/// other's updates. Plain reads do not take it.
pub struct RecordStore {
    backend: Arc<dyn StorageBackend>,
    locks: [Mutex<()>; 4],
}

impl RecordStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            locks: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// Serialize writers of one collection
    pub async fn lock(&self, collection: Collection) -> MutexGuard<'_, ()> {
        self.locks[collection.index()].lock().await
    }

    /// Read a whole collection. Missing or blank means `T::default()`.
    pub async fn try_read<T>(&self, collection: Collection) -> StoreResult<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.backend.load(collection).await? {
            Some(contents) if !contents.trim().is_empty() => serde_json::from_str(&contents)
                .map_err(|source| StoreError::Corrupt { collection, source }),
            _ => Ok(T::default()),
        }
    }

    /// Like [`RecordStore::try_read`], but falls back to the default and logs
    pub async fn read<T>(&self, collection: Collection) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.try_read(collection).await {
            Ok(value) => value,
            Err(e) => {
                warn!(collection = %collection, "Falling back to empty collection: {}", e);
                T::default()
            }
        }
    }

    pub async fn write<T>(&self, collection: Collection, value: &T) -> StoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let contents = serde_json::to_string_pretty(value)
            .map_err(|source| StoreError::Corrupt { collection, source })?;
        self.backend.replace(collection, contents).await?;
        debug!(collection = %collection, "Collection written");
        Ok(())
    }

    /// Read an array collection as raw JSON values, keeping records this
    /// version does not understand untouched
    pub async fn try_read_array(&self, collection: Collection) -> StoreResult<Vec<Value>> {
        self.try_read::<Vec<Value>>(collection).await
    }

    /// Decode the array collection into typed records, skipping malformed ones
    pub async fn read_records<T>(&self, collection: Collection) -> Vec<T>
    where
        T: DeserializeOwned,
    {
        let raw: Vec<Value> = self.read(collection).await;
        decode_records(collection, raw)
    }
}

/// Decode values one by one; malformed records are logged and skipped
pub fn decode_records<T, I>(collection: Collection, values: I) -> Vec<T>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = Value>,
{
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection = %collection, index, "Skipping malformed record: {}", e);
                None
            }
        })
        .collect()
}

/// Drop the oldest entries so at most `max` remain; returns how many were dropped
pub fn truncate_oldest<T>(items: &mut Vec<T>, max: usize) -> usize {
    if items.len() <= max {
        return 0;
    }
    let excess = items.len() - max;
    items.drain(..excess);
    excess
}
