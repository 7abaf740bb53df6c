//! Durable license store.
//!
//! [`DurableStore`] owns the whole user → record mapping and exposes
//! load/save/merge over a pluggable [`StoreBackend`]. Every operation runs
//! under a single async mutex, so each read-modify-write is atomic with
//! respect to every other store call in the process.
//!
//! There is no cache across calls: each operation reads the backing data, so
//! reads always reflect the latest persisted state.

mod backend;
mod record;

pub use backend::{FileBackend, InMemoryBackend, StoreBackend};
pub use record::{LicenseRecord, LicenseStatus, LicenseStore, LicenseUpdate};

use metrics::counter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::StorageError;

/// Result of [`DurableStore::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The record after the merge.
    pub record: LicenseRecord,

    /// Whether any field value actually changed.
    pub changed: bool,

    /// Exactly the fields that changed.
    pub delta: LicenseUpdate,
}

/// Persistent license mapping with serialized access.
pub struct DurableStore {
    backend: Arc<dyn StoreBackend>,
    lock: Mutex<()>,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
        }
    }

    /// Store backed by a JSON document at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(path)))
    }

    /// Store that lives only in this process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Load the full mapping.
    ///
    /// First access with no backing data persists and returns an empty mapping.
    pub async fn load(&self) -> Result<LicenseStore, StorageError> {
        let _guard = self.lock.lock().await;
        self.load_locked().await
    }

    /// Replace the full mapping.
    pub async fn save(&self, store: &LicenseStore) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.backend.write(store).await
    }

    /// Merge `update` into the record for `user_id`, creating it if needed.
    ///
    /// Writes only when a value changed, so replays cost no I/O beyond the read.
    #[instrument(skip(self, update), fields(user_id = %user_id, backend = self.backend.name()))]
    pub async fn merge(
        &self,
        user_id: &str,
        update: &LicenseUpdate,
    ) -> Result<MergeOutcome, StorageError> {
        let _guard = self.lock.lock().await;
        let mut store = self.load_locked().await?;

        let record = store.entry(user_id.to_string()).or_default();
        let delta = record.apply(update);
        let record = record.clone();
        let changed = !delta.is_empty();

        if changed {
            self.backend.write(&store).await?;
        }

        counter!("license_store_merges_total", "changed" => changed.to_string()).increment(1);
        debug!(changed, fields = ?delta.field_names(), "merged license update");

        Ok(MergeOutcome {
            record,
            changed,
            delta,
        })
    }

    /// Look up a single record without creating it.
    pub async fn get(&self, user_id: &str) -> Result<Option<LicenseRecord>, StorageError> {
        let _guard = self.lock.lock().await;
        let mut store = self.load_locked().await?;
        Ok(store.remove(user_id))
    }

    /// Number of users with a record.
    pub async fn len(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_locked().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    async fn load_locked(&self) -> Result<LicenseStore, StorageError> {
        match self.backend.read().await {
            Ok(store) => Ok(store),
            Err(e) if e.is_not_found() => {
                info!(location = %e.location(), "no license data found, initializing empty store");
                let empty = LicenseStore::new();
                self.backend.write(&empty).await?;
                Ok(empty)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("backend", &self.backend.name())
            .field("location", &self.backend.location())
            .finish()
    }
}
