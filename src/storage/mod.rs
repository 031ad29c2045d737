//! Versioned file storage for DEPOT.
//!
//! This module implements the concurrency-safe storage engine:
//! - Group containers mapping display names to stored names per directory
//! - Read gates that defer physical deletion past in-flight downloads
//! - Upload/download/delete pipelines with bounded move retries
//! - UUID-based storage naming decoupled from display names

mod container;
mod engine;
mod gate;
mod name;

pub use container::{ContainerRegistry, FolderStats, GroupContainer, StoredFileRecord};
pub use engine::{Download, FileStore, FolderStatsEntry, StoreEvent};
pub use gate::{DeferredAction, GateRegistry, ReadHandle};
pub use name::{generate_storage_name, generate_temp_name};
