//! DEPOT - versioned file distribution server for factory floor networks.
//!
//! Clients upload, download, delete and enumerate files organized under a
//! three-level classification (factory / group / identify). Concurrent
//! readers, overwrites and deletes of the same logical file are safe: files
//! are persisted under generated storage names, and per-file read gates defer
//! physical deletion until the last in-flight download finishes.

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod storage;

pub use classify::Classification;
pub use client::{DepotClient, TransferOutcome};
pub use config::Config;
pub use error::{DepotError, Result};
pub use protocol::{Ack, CommandHeader, OpCode};
pub use server::{handle_connection, DepotServer};
pub use storage::{
    Download, FileStore, FolderStats, FolderStatsEntry, StoreEvent, StoredFileRecord,
};
