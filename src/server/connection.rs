//! Per-connection command dispatch for the DEPOT server.
//!
//! A connection carries a sequence of commands. Operation failures are
//! acknowledged and the connection stays usable; transport and protocol
//! failures close it without an acknowledgement.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::classify::{self, Classification};
use crate::protocol::{
    read_command, read_payload_len, write_ack, write_payload_len, Ack, CommandHeader, OpCode,
};
use crate::storage::FileStore;
use crate::{DepotError, Result};

/// Handle one client connection until it disconnects, times out, or sends a
/// malformed frame.
pub async fn handle_connection(
    store: Arc<FileStore>,
    mut stream: TcpStream,
    addr: SocketAddr,
    read_timeout: Duration,
) {
    loop {
        let header = match timeout(read_timeout, read_command(&mut stream)).await {
            Ok(Ok(header)) => header,
            Ok(Err(DepotError::Io(e))) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("{} disconnected", addr);
                return;
            }
            Ok(Err(e)) => {
                // Malformed header or unknown op: close without an ack
                warn!("closing {}: {}", addr, e);
                return;
            }
            Err(_) => {
                debug!("{} idle timeout", addr);
                return;
            }
        };

        debug!("{} -> {:?} {}", addr, header.op, header.file_name);

        if let Err(e) = dispatch(&store, &mut stream, &header).await {
            warn!("closing {} after {:?}: {}", addr, header.op, e);
            return;
        }
    }
}

async fn dispatch(
    store: &Arc<FileStore>,
    stream: &mut TcpStream,
    header: &CommandHeader,
) -> Result<()> {
    let class = Classification::new(&header.factory, &header.group, &header.identify);

    match header.op {
        OpCode::Upload => handle_upload(store, stream, header, &class).await,
        OpCode::Download => handle_download(store, stream, header, &class).await,
        _ => {
            let ack = run_simple(store, header, &class).await;
            write_ack(stream, &ack).await
        }
    }
}

/// Upload exchange: validate, send a ready-ack, receive the payload, ack the
/// outcome.
async fn handle_upload(
    store: &Arc<FileStore>,
    stream: &mut TcpStream,
    header: &CommandHeader,
    class: &Classification,
) -> Result<()> {
    // Refuse before the client starts sending bytes
    if let Err(e) = class
        .validate()
        .and_then(|_| classify::validate_file_name(&header.file_name))
    {
        return write_ack(stream, &Ack::error(e.to_string())).await;
    }

    write_ack(stream, &Ack::ok("ready")).await?;

    let declared_len = read_payload_len(stream).await?;
    if declared_len > store.max_file_size() {
        // Drain the payload so the connection stays framed
        let mut sink = tokio::io::sink();
        tokio::io::copy(&mut stream.take(declared_len), &mut sink).await?;
        return write_ack(
            stream,
            &Ack::error(format!(
                "file size {} exceeds maximum allowed size {}",
                declared_len,
                store.max_file_size()
            )),
        )
        .await;
    }

    match store
        .upload(
            class,
            &header.file_name,
            stream,
            declared_len,
            &header.uploader,
            &header.tag,
        )
        .await
    {
        Ok(record) => {
            write_ack(
                stream,
                &Ack::ok(format!("uploaded {} ({} bytes)", record.display_name, record.size)),
            )
            .await
        }
        Err(DepotError::Transfer(msg)) => {
            // Payload fully consumed or connection already dead; either way
            // the ack is best-effort and the loop decides what happens next.
            write_ack(stream, &Ack::error(msg)).await
        }
        Err(e) => {
            let _ = write_ack(stream, &Ack::error(e.to_string())).await;
            Err(e)
        }
    }
}

/// Download exchange: ack with the file metadata, then stream the payload.
async fn handle_download(
    store: &Arc<FileStore>,
    stream: &mut TcpStream,
    header: &CommandHeader,
    class: &Classification,
) -> Result<()> {
    let mut download = match store.open_download(class, &header.file_name).await {
        Ok(download) => download,
        Err(e) => return write_ack(stream, &Ack::error(e.to_string())).await,
    };

    let metadata = serde_json::to_string(&download.record)
        .map_err(|e| DepotError::Protocol(format!("failed to encode metadata: {e}")))?;
    write_ack(stream, &Ack::ok(metadata)).await?;

    write_payload_len(stream, download.size).await?;
    // A mid-stream failure is a transport error: the gate still releases when
    // `download` drops here.
    download.copy_to(stream, |_, _| {}).await?;

    Ok(())
}

/// Run an operation whose exchange is a single acknowledgement.
async fn run_simple(
    store: &Arc<FileStore>,
    header: &CommandHeader,
    class: &Classification,
) -> Ack {
    match header.op {
        OpCode::DeleteOne => match store.delete_one(class, &header.file_name) {
            Ok(()) => Ack::ok("deleted"),
            Err(e) => Ack::error(e.to_string()),
        },
        OpCode::DeleteMany => match store.delete_many(class, &header.file_names) {
            Ok(()) => Ack::ok(format!("deleted {} file(s)", header.file_names.len())),
            Err(e) => Ack::error(e.to_string()),
        },
        OpCode::DeleteFolder => match store.delete_folder(class) {
            Ok(()) => Ack::ok("folder deleted"),
            Err(e) => Ack::error(e.to_string()),
        },
        OpCode::DeleteEmptyFolders => match store.delete_empty_folders(class).await {
            Ok(removed) => Ack::ok(format!("{removed}")),
            Err(e) => Ack::error(e.to_string()),
        },
        OpCode::Exists => match store.exists(class, &header.file_name) {
            Ok(true) => Ack::ok("found"),
            Ok(false) => Ack::error("not found"),
            Err(e) => Ack::error(e.to_string()),
        },
        OpCode::ListFiles => match store.list_files(class).map(|f| serde_json::to_string(&f)) {
            Ok(Ok(json)) => Ack::ok(json),
            Ok(Err(e)) => Ack::error(e.to_string()),
            Err(e) => Ack::error(e.to_string()),
        },
        OpCode::ListFolders => match store.list_folders(class).await {
            Ok(folders) => match serde_json::to_string(&folders) {
                Ok(json) => Ack::ok(json),
                Err(e) => Ack::error(e.to_string()),
            },
            Err(e) => Ack::error(e.to_string()),
        },
        OpCode::FolderStats => match store.folder_stats(class) {
            Ok(stats) => match serde_json::to_string(&stats) {
                Ok(json) => Ack::ok(json),
                Err(e) => Ack::error(e.to_string()),
            },
            Err(e) => Ack::error(e.to_string()),
        },
        OpCode::FolderStatsAll => match store.folder_stats_all(class).await {
            Ok(entries) => match serde_json::to_string(&entries) {
                Ok(json) => Ack::ok(json),
                Err(e) => Ack::error(e.to_string()),
            },
            Err(e) => Ack::error(e.to_string()),
        },
        // Upload and Download never reach here
        OpCode::Upload | OpCode::Download => Ack::error("unsupported operation"),
    }
}
