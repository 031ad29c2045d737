//! Group containers for DEPOT.
//!
//! A [`GroupContainer`] owns, for one classified directory, the mapping from
//! display file names to the internally stored names, plus aggregate stats.
//! The [`ContainerRegistry`] hands out exactly one container per
//! case-normalized directory path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One live file inside a group container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFileRecord {
    /// User-visible file name.
    pub display_name: String,
    /// Internally generated name the bytes are persisted under.
    pub storage_name: String,
    /// File size in bytes.
    pub size: u64,
    /// Who uploaded the file.
    pub uploader: String,
    /// Free-form tag supplied by the uploader.
    pub tag: String,
    /// When the file was uploaded.
    pub uploaded_at: DateTime<Utc>,
}

/// Aggregate stats over the live records of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStats {
    /// Number of live files.
    pub count: usize,
    /// Total size of live files in bytes.
    pub total_size: u64,
    /// Newest upload time, if any file exists.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Display-name to storage-name mapping for one directory.
///
/// All mutations serialize through this container's own lock; containers for
/// different directories never contend.
#[derive(Debug)]
pub struct GroupContainer {
    dir_path: PathBuf,
    records: Mutex<HashMap<String, StoredFileRecord>>,
}

impl GroupContainer {
    fn new(dir_path: PathBuf) -> Self {
        Self {
            dir_path,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredFileRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The directory this container fronts.
    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    /// Look up the storage name for a display name (case-insensitive).
    pub fn resolve_storage_name(&self, display_name: &str) -> Option<String> {
        self.lock()
            .get(&display_name.to_uppercase())
            .map(|r| r.storage_name.clone())
    }

    /// Get a snapshot of the record for a display name.
    pub fn get(&self, display_name: &str) -> Option<StoredFileRecord> {
        self.lock().get(&display_name.to_uppercase()).cloned()
    }

    /// Atomically install `record` for its display name, returning the
    /// previously stored name if the name was already taken.
    ///
    /// The caller schedules deletion of the returned storage name; the old
    /// record is never mutated in place.
    pub fn upsert(&self, record: StoredFileRecord) -> Option<String> {
        let key = record.display_name.to_uppercase();
        self.lock()
            .insert(key, record)
            .map(|old| old.storage_name)
    }

    /// Remove the record for a display name, returning its storage name so
    /// the caller can schedule physical deletion.
    pub fn remove(&self, display_name: &str) -> Option<String> {
        self.lock()
            .remove(&display_name.to_uppercase())
            .map(|r| r.storage_name)
    }

    /// Aggregate stats over the live records.
    pub fn stats(&self) -> FolderStats {
        let records = self.lock();
        FolderStats {
            count: records.len(),
            total_size: records.values().map(|r| r.size).sum(),
            last_modified: records.values().map(|r| r.uploaded_at).max(),
        }
    }

    /// Snapshot of the live records, ordered by display name.
    pub fn list(&self) -> Vec<StoredFileRecord> {
        let mut records: Vec<_> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        records
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the container holds no records.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Process-wide registry of group containers, keyed by the case-normalized
/// directory path.
///
/// The registry lock is held only for map lookup and insert, never while a
/// container lock is taken or while filesystem I/O runs.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    containers: Mutex<HashMap<String, Arc<GroupContainer>>>,
}

impl ContainerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<GroupContainer>>> {
        self.containers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the container for `key`, creating an empty one for `dir_path` on
    /// first use.
    ///
    /// For a given key exactly one container instance exists until it is
    /// explicitly removed.
    pub fn get_or_create(&self, key: &str, dir_path: &Path) -> Arc<GroupContainer> {
        let mut containers = self.lock();
        if let Some(container) = containers.get(key) {
            return Arc::clone(container);
        }
        debug!("creating group container for {}", dir_path.display());
        let container = Arc::new(GroupContainer::new(dir_path.to_path_buf()));
        containers.insert(key.to_string(), Arc::clone(&container));
        container
    }

    /// Get the container for `key` if it exists.
    pub fn get(&self, key: &str) -> Option<Arc<GroupContainer>> {
        self.lock().get(key).map(Arc::clone)
    }

    /// Remove the container for `key` and best-effort delete its backing
    /// directory recursively.
    ///
    /// Directory deletion failures are logged and swallowed; the directory
    /// may be legitimately gone already or still in use.
    pub fn remove(&self, key: &str) -> Option<Arc<GroupContainer>> {
        let removed = self.lock().remove(key);

        if let Some(ref container) = removed {
            let dir = container.dir_path();
            match std::fs::remove_dir_all(dir) {
                Ok(()) => info!("deleted directory {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to delete directory {}: {}", dir.display(), e),
            }
        }

        removed
    }

    /// Number of live containers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry holds no containers.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
