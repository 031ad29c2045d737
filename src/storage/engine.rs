//! Transfer engine for DEPOT.
//!
//! [`FileStore`] implements the upload, download, delete, listing and stats
//! pipelines on top of the container and gate registries. Network and
//! filesystem I/O always happen outside the registry locks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::classify::{self, normalize_key, Classification};
use crate::config::StorageConfig;
use crate::storage::container::{ContainerRegistry, FolderStats, GroupContainer, StoredFileRecord};
use crate::storage::gate::{DeferredAction, GateRegistry, ReadHandle};
use crate::storage::name::{generate_storage_name, generate_temp_name};
use crate::{DepotError, Result};

/// Chunk size for streaming copies.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Notification emitted by the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A file finished uploading with the given final metadata.
    Uploaded(StoredFileRecord),
}

/// Stats for one immediate subdirectory, used by the stats-all operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderStatsEntry {
    /// Subdirectory name.
    pub name: String,
    /// Aggregate stats of its container.
    pub stats: FolderStats,
}

/// Versioned, concurrency-safe file store.
///
/// Uploads land in a scratch directory first and are moved into place under a
/// fresh storage name; downloads hold a read gate so a concurrent replace or
/// delete never invalidates the bytes they are streaming.
pub struct FileStore {
    root: PathBuf,
    scratch: PathBuf,
    max_file_size: u64,
    move_max_attempts: u32,
    move_retry_delay: Duration,
    containers: ContainerRegistry,
    gates: Arc<GateRegistry>,
    events: broadcast::Sender<StoreEvent>,
}

impl FileStore {
    /// Create a file store, ensuring the root and scratch directories exist.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let root = PathBuf::from(&config.root_path);
        let scratch = PathBuf::from(&config.scratch_path);
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&scratch)?;

        let (events, _) = broadcast::channel(64);

        Ok(Self {
            root,
            scratch,
            max_file_size: config.max_upload_size_mb * 1024 * 1024,
            move_max_attempts: config.move_max_attempts.max(1),
            move_retry_delay: Duration::from_millis(config.move_retry_delay_ms),
            containers: ContainerRegistry::new(),
            gates: Arc::new(GateRegistry::new()),
            events,
        })
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The maximum accepted upload size in bytes.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Subscribe to store notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn container_for(&self, class: &Classification) -> Result<Arc<GroupContainer>> {
        let dir = class.dir_path(&self.root)?;
        let key = normalize_key(&dir);
        Ok(self.containers.get_or_create(&key, &dir))
    }

    fn existing_container(&self, class: &Classification) -> Result<Option<Arc<GroupContainer>>> {
        let key = class.registry_key(&self.root)?;
        Ok(self.containers.get(&key))
    }

    /// Upload a file: receive `declared_len` bytes from `reader` into a
    /// scratch temp file, move it into place under a fresh storage name with
    /// a bounded retry, install the record for `display_name`, and schedule
    /// deletion of the replaced version.
    ///
    /// Any failure removes the temp file and leaves the container untouched,
    /// so a storage name handed out by `upsert` always refers to a fully
    /// moved file.
    pub async fn upload<R>(
        &self,
        class: &Classification,
        display_name: &str,
        reader: &mut R,
        declared_len: u64,
        uploader: &str,
        tag: &str,
    ) -> Result<StoredFileRecord>
    where
        R: AsyncRead + Unpin,
    {
        classify::validate_file_name(display_name)?;

        if declared_len > self.max_file_size {
            return Err(DepotError::Validation(format!(
                "file size {} exceeds maximum allowed size {}",
                declared_len, self.max_file_size
            )));
        }

        // The container's directory, fixed at first creation, is the one
        // physical home for every case variant of this classification.
        let container = self.container_for(class)?;
        let dir = container.dir_path().to_path_buf();

        // Receive into scratch, never directly into the target directory.
        let temp_path = self.scratch.join(generate_temp_name());
        if let Err(e) = self.receive_to_temp(reader, declared_len, &temp_path).await {
            remove_file_quietly(&temp_path).await;
            return Err(e);
        }

        let storage_name = generate_storage_name(display_name);
        let target = dir.join(&storage_name);
        if let Err(e) = self.move_into_place(&temp_path, &target, &dir).await {
            remove_file_quietly(&temp_path).await;
            return Err(e);
        }

        let record = StoredFileRecord {
            display_name: display_name.to_string(),
            storage_name: storage_name.clone(),
            size: declared_len,
            uploader: uploader.to_string(),
            tag: tag.to_string(),
            uploaded_at: Utc::now(),
        };
        let old_storage_name = container.upsert(record.clone());

        // The replaced version goes away once its last reader releases.
        if let Some(old) = old_storage_name {
            self.gates
                .defer(&old, DeferredAction::RemoveFile(dir.join(&old)));
        }

        info!(
            "uploaded {} as {} ({} bytes) to {}",
            display_name,
            storage_name,
            declared_len,
            dir.display()
        );
        let _ = self.events.send(StoreEvent::Uploaded(record.clone()));

        Ok(record)
    }

    async fn receive_to_temp<R>(
        &self,
        reader: &mut R,
        declared_len: u64,
        temp_path: &Path,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = File::create(temp_path).await?;
        let mut limited = reader.take(declared_len);
        let received = tokio::io::copy(&mut limited, &mut file).await?;
        file.flush().await?;

        if received != declared_len {
            return Err(DepotError::Transfer(format!(
                "incomplete upload: declared {declared_len} bytes, received {received}"
            )));
        }
        Ok(())
    }

    /// Move the received temp file to its final storage path, retrying a
    /// bounded number of times with a delay between attempts. Transient
    /// locking by virus scanners on the target directory is the usual cause
    /// of a first-attempt failure.
    async fn move_into_place(&self, temp: &Path, target: &Path, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).await?;

        let mut last_err = None;
        for attempt in 1..=self.move_max_attempts {
            match fs::rename(temp, target).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "move attempt {}/{} into {} failed: {}",
                        attempt,
                        self.move_max_attempts,
                        target.display(),
                        e
                    );
                    last_err = Some(e);
                    if attempt < self.move_max_attempts {
                        tokio::time::sleep(self.move_retry_delay).await;
                    }
                }
            }
        }

        Err(DepotError::Transfer(format!(
            "failed to move uploaded file into place after {} attempts: {}",
            self.move_max_attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Open a download for a display name.
    ///
    /// The returned [`Download`] holds a read gate on the storage name; any
    /// delete or replacing upload that happens while it is live defers the
    /// physical removal until the download is dropped.
    pub async fn open_download(
        &self,
        class: &Classification,
        display_name: &str,
    ) -> Result<Download> {
        let container = self
            .existing_container(class)?
            .ok_or_else(|| DepotError::NotFound(format!("file {display_name}")))?;
        let record = container
            .get(display_name)
            .ok_or_else(|| DepotError::NotFound(format!("file {display_name}")))?;

        let gate = self.gates.acquire_read(&record.storage_name);
        let path = container.dir_path().join(&record.storage_name);

        // A record whose physical file vanished out-of-band resolves here as
        // a clean not-found, releasing the gate on the error path.
        let file = File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DepotError::NotFound(format!("file {display_name}"))
            } else {
                DepotError::Io(e)
            }
        })?;
        let size = file.metadata().await?.len();

        debug!(
            "download of {} ({}) opened, {} bytes",
            display_name, record.storage_name, size
        );

        Ok(Download {
            record,
            size,
            file,
            _gate: gate,
        })
    }

    /// Remove one display name. Idempotent: an absent name still succeeds.
    pub fn delete_one(&self, class: &Classification, display_name: &str) -> Result<()> {
        let Some(container) = self.existing_container(class)? else {
            return Ok(());
        };
        if let Some(storage_name) = container.remove(display_name) {
            let path = container.dir_path().join(&storage_name);
            self.gates
                .defer(&storage_name, DeferredAction::RemoveFile(path));
            info!("deleted {} ({})", display_name, storage_name);
        }
        Ok(())
    }

    /// Remove a batch of display names. Names that are already absent are
    /// skipped without failing the batch.
    pub fn delete_many(&self, class: &Classification, display_names: &[String]) -> Result<()> {
        for name in display_names {
            self.delete_one(class, name)?;
        }
        Ok(())
    }

    /// Remove the whole classified directory and its container.
    ///
    /// Destructive admin operation: it ignores per-file gates, so it is
    /// unsafe under concurrent readers of files in this directory.
    pub fn delete_folder(&self, class: &Classification) -> Result<()> {
        let dir = class.dir_path(&self.root)?;
        let key = normalize_key(&dir);

        if self.containers.remove(&key).is_none() {
            // No container: still delete any directory left on disk.
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => info!("deleted directory {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to delete directory {}: {}", dir.display(), e),
            }
        }
        Ok(())
    }

    /// Remove every immediate subdirectory whose container holds no live
    /// records. Returns the number of directories removed.
    pub async fn delete_empty_folders(&self, class: &Classification) -> Result<usize> {
        let dir = class.dir_path(&self.root)?;
        let mut removed = 0;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let key = normalize_key(&path);
            let live = self.containers.get(&key).map(|c| c.len()).unwrap_or(0);
            if live == 0 {
                if self.containers.remove(&key).is_none() {
                    match std::fs::remove_dir_all(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!("failed to delete directory {}: {}", path.display(), e);
                            continue;
                        }
                    }
                }
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Whether a display name currently resolves in its container.
    pub fn exists(&self, class: &Classification, display_name: &str) -> Result<bool> {
        Ok(self
            .existing_container(class)?
            .and_then(|c| c.resolve_storage_name(display_name))
            .is_some())
    }

    /// Snapshot of the live records for a classification.
    pub fn list_files(&self, class: &Classification) -> Result<Vec<StoredFileRecord>> {
        Ok(self
            .existing_container(class)?
            .map(|c| c.list())
            .unwrap_or_default())
    }

    /// Names of the immediate subdirectories of a classification, sorted.
    pub async fn list_folders(&self, class: &Classification) -> Result<Vec<String>> {
        let dir = class.dir_path(&self.root)?;
        let mut folders = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(folders),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.path().is_dir() {
                folders.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        folders.sort();
        Ok(folders)
    }

    /// Aggregate stats for a classification's container.
    pub fn folder_stats(&self, class: &Classification) -> Result<FolderStats> {
        Ok(self
            .existing_container(class)?
            .map(|c| c.stats())
            .unwrap_or(FolderStats {
                count: 0,
                total_size: 0,
                last_modified: None,
            }))
    }

    /// Stats for every immediate subdirectory of a classification.
    pub async fn folder_stats_all(&self, class: &Classification) -> Result<Vec<FolderStatsEntry>> {
        let dir = class.dir_path(&self.root)?;
        let mut entries_out = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries_out),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let key = normalize_key(&path);
            let stats = self
                .containers
                .get(&key)
                .map(|c| c.stats())
                .unwrap_or(FolderStats {
                    count: 0,
                    total_size: 0,
                    last_modified: None,
                });
            entries_out.push(FolderStatsEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                stats,
            });
        }

        entries_out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries_out)
    }

    /// Remove scratch temp files older than `max_age`, left behind by
    /// timed-out uploads. Returns the number of files removed.
    pub async fn sweep_scratch(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.scratch).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            let age = modified.elapsed().unwrap_or_default();
            if age >= max_age && fs::remove_file(&path).await.is_ok() {
                debug!("swept orphaned temp file {}", path.display());
                removed += 1;
            }
        }

        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn gates(&self) -> &Arc<GateRegistry> {
        &self.gates
    }
}

/// An open download holding a read gate on its storage name.
pub struct Download {
    /// Metadata of the downloaded file.
    pub record: StoredFileRecord,
    /// Physical file size in bytes.
    pub size: u64,
    file: File,
    _gate: ReadHandle,
}

impl Download {
    /// Stream the file's bytes to `writer`, invoking `progress` with
    /// `(bytes_sent, total)` after each chunk.
    ///
    /// The gate releases when the `Download` is dropped, whether or not the
    /// copy succeeded.
    pub async fn copy_to<W, F>(&mut self, writer: &mut W, mut progress: F) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(u64, u64),
    {
        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        let mut sent = 0u64;

        loop {
            let n = self.file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            sent += n as u64;
            progress(sent, self.size);
        }
        writer.flush().await?;

        Ok(sent)
    }

    /// Read the whole file into memory. Intended for small files and tests.
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size as usize);
        self.copy_to(&mut out, |_, _| {}).await?;
        Ok(out)
    }
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove temp file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(temp: &TempDir) -> FileStore {
        let config = StorageConfig {
            root_path: temp.path().join("files").to_string_lossy().into_owned(),
            scratch_path: temp.path().join("scratch").to_string_lossy().into_owned(),
            max_upload_size_mb: 1,
            move_max_attempts: 3,
            move_retry_delay_ms: 10,
        };
        FileStore::new(&config).unwrap()
    }

    fn class() -> Classification {
        Classification::new("factory1", "group1", "line1")
    }

    async fn upload_bytes(store: &FileStore, class: &Classification, name: &str, data: &[u8]) {
        let mut reader = data;
        store
            .upload(class, name, &mut reader, data.len() as u64, "tester", "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        upload_bytes(&store, &class(), "1.txt", b"hello depot").await;

        let mut download = store.open_download(&class(), "1.txt").await.unwrap();
        assert_eq!(download.size, 11);
        assert_eq!(download.read_all().await.unwrap(), b"hello depot");
        assert_eq!(download.record.display_name, "1.txt");
        assert_eq!(download.record.uploader, "tester");
    }

    #[tokio::test]
    async fn test_upload_emits_event() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let mut events = store.subscribe();

        upload_bytes(&store, &class(), "1.txt", b"x").await;

        let StoreEvent::Uploaded(record) = events.try_recv().unwrap();
        assert_eq!(record.display_name, "1.txt");
        assert_eq!(record.size, 1);
    }

    #[tokio::test]
    async fn test_upload_short_read_leaves_container_untouched() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let mut reader: &[u8] = b"only ten b";
        let result = store
            .upload(&class(), "1.txt", &mut reader, 100, "tester", "")
            .await;

        assert!(matches!(result, Err(DepotError::Transfer(_))));
        assert!(!store.exists(&class(), "1.txt").unwrap());

        // No temp file left behind
        let scratch = temp.path().join("scratch");
        assert_eq!(std::fs::read_dir(scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_oversize_declaration() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let mut reader: &[u8] = b"";
        let result = store
            .upload(&class(), "big.bin", &mut reader, 2 * 1024 * 1024, "t", "")
            .await;

        assert!(matches!(result, Err(DepotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_file_name() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let mut reader: &[u8] = b"x";
        let result = store
            .upload(&class(), "../escape.txt", &mut reader, 1, "t", "")
            .await;

        assert!(matches!(result, Err(DepotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reupload_replaces_and_deletes_old_version() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let class = class();

        upload_bytes(&store, &class, "1.txt", b"version one").await;
        let dir = class.dir_path(store.root()).unwrap();
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);

        upload_bytes(&store, &class, "1.txt", b"version two").await;

        // Old physical file removed immediately (no reader held it)
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);

        let mut download = store.open_download(&class, "1.txt").await.unwrap();
        assert_eq!(download.read_all().await.unwrap(), b"version two");
    }

    #[tokio::test]
    async fn test_reader_survives_replace() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let class = class();

        upload_bytes(&store, &class, "1.txt", b"version one").await;
        let mut paused = store.open_download(&class, "1.txt").await.unwrap();
        let old_storage = paused.record.storage_name.clone();

        // Replace while the first download is still open
        upload_bytes(&store, &class, "1.txt", b"version two").await;

        let dir = class.dir_path(store.root()).unwrap();
        assert!(dir.join(&old_storage).exists());
        assert_eq!(store.gates().active_readers(&old_storage), 1);

        // The paused download still reads the complete old bytes
        assert_eq!(paused.read_all().await.unwrap(), b"version one");
        drop(paused);

        // Last reader released: the old version is gone
        assert!(!dir.join(&old_storage).exists());
        assert_eq!(store.gates().gate_count(), 0);

        let mut fresh = store.open_download(&class, "1.txt").await.unwrap();
        assert_eq!(fresh.read_all().await.unwrap(), b"version two");
    }

    #[tokio::test]
    async fn test_reupload_under_different_case_replaces_in_place() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let lower = class();
        let upper = Classification::new("FACTORY1", "GROUP1", "LINE1");

        upload_bytes(&store, &lower, "doc.txt", b"version one").await;
        upload_bytes(&store, &upper, "doc.txt", b"version two").await;

        // Both case variants land in the directory fixed at first creation,
        // so the replacement is reachable and the old file is gone.
        let dir = lower.dir_path(store.root()).unwrap();
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);

        let mut download = store.open_download(&lower, "doc.txt").await.unwrap();
        assert_eq!(download.read_all().await.unwrap(), b"version two");
        drop(download);

        let mut download = store.open_download(&upper, "doc.txt").await.unwrap();
        assert_eq!(download.read_all().await.unwrap(), b"version two");
    }

    #[tokio::test]
    async fn test_move_retry_recovers_after_transient_failure() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig {
            root_path: temp.path().join("files").to_string_lossy().into_owned(),
            scratch_path: temp.path().join("scratch").to_string_lossy().into_owned(),
            max_upload_size_mb: 1,
            move_max_attempts: 3,
            move_retry_delay_ms: 200,
        };
        let store = FileStore::new(&config).unwrap();

        let dir = temp.path().join("files").join("factory1");
        std::fs::create_dir_all(&dir).unwrap();
        let source = temp.path().join("scratch").join("in.part");
        std::fs::write(&source, b"payload").unwrap();

        // A directory squatting on the target path makes rename fail until
        // it is cleared mid-retry.
        let target = dir.join("final.bin");
        std::fs::create_dir(&target).unwrap();
        let clear = {
            let target = target.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                std::fs::remove_dir(&target).unwrap();
            })
        };

        store.move_into_place(&source, &target, &dir).await.unwrap();
        clear.await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_move_retry_exhaustion_reports_transfer_error() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let dir = temp.path().join("files").join("factory1");
        std::fs::create_dir_all(&dir).unwrap();
        let source = temp.path().join("scratch").join("in.part");
        std::fs::write(&source, b"payload").unwrap();

        // The target path stays occupied, so every attempt fails
        let target = dir.join("final.bin");
        std::fs::create_dir(&target).unwrap();

        let result = store.move_into_place(&source, &target, &dir).await;

        match result {
            Err(DepotError::Transfer(msg)) => assert!(msg.contains("3 attempts")),
            other => panic!("expected transfer error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_move_leaves_no_record() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        // A regular file squatting on the factory path prevents the
        // classified directory from ever being created.
        std::fs::write(temp.path().join("files").join("factory1"), b"in the way").unwrap();

        let mut reader: &[u8] = b"data";
        let result = store.upload(&class(), "doc.txt", &mut reader, 4, "t", "").await;

        assert!(result.is_err());
        assert!(!store.exists(&class(), "doc.txt").unwrap());
        let scratch = temp.path().join("scratch");
        assert_eq!(std::fs::read_dir(scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        // Absent name, absent container: both succeed
        store.delete_one(&class(), "ghost.txt").unwrap();

        upload_bytes(&store, &class(), "1.txt", b"x").await;
        store.delete_one(&class(), "1.txt").unwrap();
        store.delete_one(&class(), "1.txt").unwrap();

        assert!(!store.exists(&class(), "1.txt").unwrap());
    }

    #[tokio::test]
    async fn test_delete_while_reading_defers_physical_removal() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let class = class();

        upload_bytes(&store, &class, "1.txt", b"held bytes").await;
        let mut download = store.open_download(&class, "1.txt").await.unwrap();
        let storage = download.record.storage_name.clone();
        let path = class.dir_path(store.root()).unwrap().join(&storage);

        store.delete_one(&class, "1.txt").unwrap();

        // Bookkeeping is gone immediately, the bytes are not
        assert!(!store.exists(&class, "1.txt").unwrap());
        assert!(path.exists());

        assert_eq!(download.read_all().await.unwrap(), b"held bytes");
        drop(download);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_delete_many_skips_absent_names() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        upload_bytes(&store, &class(), "a.txt", b"a").await;
        upload_bytes(&store, &class(), "b.txt", b"b").await;

        store
            .delete_many(
                &class(),
                &[
                    "a.txt".to_string(),
                    "missing.txt".to_string(),
                    "b.txt".to_string(),
                ],
            )
            .unwrap();

        assert_eq!(store.folder_stats(&class()).unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_delete_folder() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let class = class();

        upload_bytes(&store, &class, "1.txt", b"x").await;
        let dir = class.dir_path(store.root()).unwrap();
        assert!(dir.exists());

        store.delete_folder(&class).unwrap();

        assert!(!dir.exists());
        assert!(!store.exists(&class, "1.txt").unwrap());
    }

    #[tokio::test]
    async fn test_delete_empty_folders() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let parent = Classification::new("factory1", "", "");

        let full = Classification::new("factory1", "busy", "");
        upload_bytes(&store, &full, "keep.txt", b"x").await;

        let emptied = Classification::new("factory1", "emptied", "");
        upload_bytes(&store, &emptied, "gone.txt", b"x").await;
        store.delete_one(&emptied, "gone.txt").unwrap();

        let removed = store.delete_empty_folders(&parent).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(
            store.list_folders(&parent).await.unwrap(),
            vec!["busy".to_string()]
        );
    }

    #[tokio::test]
    async fn test_exists_and_case_insensitive_lookup() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        upload_bytes(&store, &class(), "Report.PDF", b"pdf").await;

        assert!(store.exists(&class(), "report.pdf").unwrap());
        let upper = Classification::new("FACTORY1", "GROUP1", "LINE1");
        assert!(store.exists(&upper, "Report.PDF").unwrap());
        assert!(!store.exists(&class(), "other.pdf").unwrap());
    }

    #[tokio::test]
    async fn test_list_files_and_stats() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        assert!(store.list_files(&class()).unwrap().is_empty());

        upload_bytes(&store, &class(), "b.txt", b"bb").await;
        upload_bytes(&store, &class(), "a.txt", b"aaa").await;

        let files = store.list_files(&class()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].display_name, "a.txt");
        assert_eq!(files[1].display_name, "b.txt");

        let stats = store.folder_stats(&class()).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 5);
        assert!(stats.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_list_folders_and_stats_all() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let parent = Classification::new("factory1", "", "");

        upload_bytes(
            &store,
            &Classification::new("factory1", "beta", ""),
            "b.txt",
            b"1234",
        )
        .await;
        upload_bytes(
            &store,
            &Classification::new("factory1", "alpha", ""),
            "a.txt",
            b"12",
        )
        .await;

        let folders = store.list_folders(&parent).await.unwrap();
        assert_eq!(folders, vec!["alpha".to_string(), "beta".to_string()]);

        let all = store.folder_stats_all(&parent).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha");
        assert_eq!(all[0].stats.total_size, 2);
        assert_eq!(all[1].name, "beta");
        assert_eq!(all[1].stats.total_size, 4);
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let result = store.open_download(&class(), "nope.txt").await;
        assert!(matches!(result, Err(DepotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dangling_record_downloads_fail_cleanly() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let class = class();

        upload_bytes(&store, &class, "1.txt", b"x").await;

        // Record installed but the physical file removed out-of-band.
        let storage = store
            .existing_container(&class)
            .unwrap()
            .unwrap()
            .resolve_storage_name("1.txt")
            .unwrap();
        std::fs::remove_file(class.dir_path(store.root()).unwrap().join(&storage)).unwrap();

        let result = store.open_download(&class, "1.txt").await;
        assert!(matches!(result, Err(DepotError::NotFound(_))));
        // The error path released the gate
        assert_eq!(store.gates().gate_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_callback_granularity() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);

        let data = vec![7u8; COPY_CHUNK_SIZE + 100];
        let mut reader: &[u8] = &data;
        store
            .upload(&class(), "big.bin", &mut reader, data.len() as u64, "t", "")
            .await
            .unwrap();

        let mut download = store.open_download(&class(), "big.bin").await.unwrap();
        let mut calls = Vec::new();
        let mut sink = Vec::new();
        download
            .copy_to(&mut sink, |sent, total| calls.push((sent, total)))
            .await
            .unwrap();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (COPY_CHUNK_SIZE as u64, data.len() as u64));
        assert_eq!(calls[1], (data.len() as u64, data.len() as u64));
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn test_sweep_scratch() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp);
        let scratch = temp.path().join("scratch");

        std::fs::write(scratch.join("stale.part"), b"orphan").unwrap();

        // Zero max age sweeps everything
        let removed = store.sweep_scratch(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);

        // A fresh file survives a large max age
        std::fs::write(scratch.join("fresh.part"), b"live").unwrap();
        let removed = store.sweep_scratch(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 0);
    }
}
