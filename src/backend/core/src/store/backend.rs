//! Store backend implementations.
//!
//! A backend persists the whole [`LicenseStore`] as one unit:
//! - **FileBackend**: JSON document on local disk, replaced atomically
//! - **InMemoryBackend**: process-local storage for tests and ephemeral runs

use async_trait::async_trait;
use parking_lot::RwLock;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::record::LicenseStore;
use crate::error::StorageError;

// ═══════════════════════════════════════════════════════════════════════════════
// Store Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Whole-mapping persistence.
///
/// Implementations report absent backing data as
/// [`StorageErrorKind::NotFound`](crate::error::StorageErrorKind::NotFound)
/// so the store can bootstrap an empty mapping.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Read the full mapping.
    async fn read(&self) -> Result<LicenseStore, StorageError>;

    /// Replace the full mapping.
    async fn write(&self, store: &LicenseStore) -> Result<(), StorageError>;

    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Human-readable location of the backing data, used in errors and logs.
    fn location(&self) -> String;
}

// ═══════════════════════════════════════════════════════════════════════════════
// File Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON document on local disk.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> Result<(), StorageError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent.display().to_string(), e)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    async fn read(&self) -> Result<LicenseStore, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found(self.location()));
            }
            Err(e) => return Err(StorageError::io(self.location(), e)),
        };

        // A blank document is an empty store, not corruption.
        if bytes.iter().all(u8::is_ascii_whitespace) {
            debug!(path = %self.path.display(), "license document is blank");
            return Ok(LicenseStore::new());
        }

        serde_json::from_slice(&bytes).map_err(|e| StorageError::corrupt(self.location(), e))
    }

    async fn write(&self, store: &LicenseStore) -> Result<(), StorageError> {
        self.ensure_parent().await?;

        let mut payload = serde_json::to_vec_pretty(store)
            .map_err(|e| StorageError::corrupt(self.location(), e))?;
        payload.push(b'\n');

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(|e| StorageError::io(temp_path.display().to_string(), e))?;

        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                warn!(path = %temp_path.display(), error = %cleanup, "failed to remove temp file");
            }
            return Err(StorageError::io(self.location(), e));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local backend. Reports `NotFound` until the first write.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Option<LicenseStore>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with existing contents.
    pub fn with_store(store: LicenseStore) -> Self {
        Self {
            data: RwLock::new(Some(store)),
        }
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    async fn read(&self) -> Result<LicenseStore, StorageError> {
        self.data
            .read()
            .clone()
            .ok_or_else(|| StorageError::not_found(self.location()))
    }

    async fn write(&self, store: &LicenseStore) -> Result<(), StorageError> {
        *self.data.write() = Some(store.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
