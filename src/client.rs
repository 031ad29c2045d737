//! Client stub for the DEPOT protocol.
//!
//! One method per server operation. Each call opens a fresh connection,
//! performs the exchange, and reports the outcome. Upload and download accept
//! a progress callback invoked with `(bytes_transferred, total)` per chunk.

use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::classify::Classification;
use crate::protocol::{
    read_ack, read_payload_len, write_command, write_payload_len, Ack, CommandHeader, OpCode,
};
use crate::storage::{FolderStats, FolderStatsEntry, StoredFileRecord};
use crate::{DepotError, Result};

/// I/O chunk size for file transfers.
const CHUNK_SIZE: usize = 64 * 1024;

/// Success/failure result of one client call.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Whether the server acknowledged success.
    pub success: bool,
    /// Server message (or JSON result payload).
    pub message: String,
}

impl TransferOutcome {
    fn from_ack(ack: Ack) -> Self {
        Self {
            success: ack.is_ok(),
            message: ack.message,
        }
    }
}

/// Client for a DEPOT server.
#[derive(Debug, Clone)]
pub struct DepotClient {
    addr: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl DepotClient {
    /// Create a client for `addr` (host:port) with default timeouts.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(300),
        }
    }

    /// Set the connect and read timeouts.
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    async fn connect(&self) -> Result<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(DepotError::Timeout(format!("connect to {}", self.addr))),
        }
    }

    async fn read_ack_timed(&self, stream: &mut TcpStream) -> Result<Ack> {
        match timeout(self.read_timeout, read_ack(stream)).await {
            Ok(result) => result,
            Err(_) => Err(DepotError::Timeout("waiting for acknowledgement".to_string())),
        }
    }

    /// One-shot exchange: send a command header, read the acknowledgement.
    async fn exchange(&self, header: &CommandHeader) -> Result<Ack> {
        let mut stream = self.connect().await?;
        write_command(&mut stream, header).await?;
        self.read_ack_timed(&mut stream).await
    }

    fn header(op: OpCode, class: &Classification) -> CommandHeader {
        CommandHeader::new(op).with_classification(
            class.factory.clone(),
            class.group.clone(),
            class.identify.clone(),
        )
    }

    /// Upload a local file under `server_name`.
    pub async fn upload<F>(
        &self,
        source: impl AsRef<Path>,
        server_name: &str,
        class: &Classification,
        uploader: &str,
        tag: &str,
        mut progress: F,
    ) -> Result<TransferOutcome>
    where
        F: FnMut(u64, u64),
    {
        let mut file = File::open(source.as_ref()).await?;
        let total = file.metadata().await?.len();

        let mut stream = self.connect().await?;
        let header = Self::header(OpCode::Upload, class)
            .with_file_name(server_name)
            .with_uploader(uploader)
            .with_tag(tag);
        write_command(&mut stream, &header).await?;

        let ready = self.read_ack_timed(&mut stream).await?;
        if !ready.is_ok() {
            return Ok(TransferOutcome::from_ack(ready));
        }

        write_payload_len(&mut stream, total).await?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            sent += n as u64;
            progress(sent, total);
        }
        stream.flush().await?;

        let ack = self.read_ack_timed(&mut stream).await?;
        Ok(TransferOutcome::from_ack(ack))
    }

    /// Download a file into `destination`.
    ///
    /// A failed or incomplete transfer removes the partial destination file.
    pub async fn download<F>(
        &self,
        class: &Classification,
        file_name: &str,
        destination: impl AsRef<Path>,
        mut progress: F,
    ) -> Result<TransferOutcome>
    where
        F: FnMut(u64, u64),
    {
        let mut stream = self.connect().await?;
        let header = Self::header(OpCode::Download, class).with_file_name(file_name);
        write_command(&mut stream, &header).await?;

        let ack = self.read_ack_timed(&mut stream).await?;
        if !ack.is_ok() {
            return Ok(TransferOutcome::from_ack(ack));
        }

        let total = read_payload_len(&mut stream).await?;
        let destination = destination.as_ref();
        let mut file = File::create(destination).await?;

        let result = Self::receive_payload(&mut stream, &mut file, total, &mut progress).await;
        if let Err(e) = result {
            drop(file);
            let _ = tokio::fs::remove_file(destination).await;
            return Err(e);
        }

        Ok(TransferOutcome::from_ack(ack))
    }

    async fn receive_payload<F>(
        stream: &mut TcpStream,
        file: &mut File,
        total: u64,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        let mut limited = stream.take(total);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received = 0u64;

        loop {
            let n = limited.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            received += n as u64;
            progress(received, total);
        }
        file.flush().await?;

        if received != total {
            return Err(DepotError::Transfer(format!(
                "incomplete download: expected {total} bytes, received {received}"
            )));
        }
        Ok(())
    }

    /// Delete one file.
    pub async fn delete(&self, file_name: &str, class: &Classification) -> Result<TransferOutcome> {
        let header = Self::header(OpCode::DeleteOne, class).with_file_name(file_name);
        Ok(TransferOutcome::from_ack(self.exchange(&header).await?))
    }

    /// Delete a batch of files.
    pub async fn delete_many(
        &self,
        file_names: Vec<String>,
        class: &Classification,
    ) -> Result<TransferOutcome> {
        let header = Self::header(OpCode::DeleteMany, class).with_file_names(file_names);
        Ok(TransferOutcome::from_ack(self.exchange(&header).await?))
    }

    /// Delete a whole classified folder.
    pub async fn delete_folder(&self, class: &Classification) -> Result<TransferOutcome> {
        let header = Self::header(OpCode::DeleteFolder, class);
        Ok(TransferOutcome::from_ack(self.exchange(&header).await?))
    }

    /// Delete every empty subfolder of a classification.
    pub async fn delete_empty_folders(&self, class: &Classification) -> Result<TransferOutcome> {
        let header = Self::header(OpCode::DeleteEmptyFolders, class);
        Ok(TransferOutcome::from_ack(self.exchange(&header).await?))
    }

    /// Whether `file_name` exists under the classification.
    pub async fn exists(&self, file_name: &str, class: &Classification) -> Result<bool> {
        let header = Self::header(OpCode::Exists, class).with_file_name(file_name);
        let ack = self.exchange(&header).await?;
        Ok(ack.is_ok())
    }

    /// List the files of a classification.
    pub async fn list_files(&self, class: &Classification) -> Result<Vec<StoredFileRecord>> {
        let header = Self::header(OpCode::ListFiles, class);
        let ack = self.exchange(&header).await?;
        Self::parse_result(ack)
    }

    /// List the immediate subfolders of a classification.
    pub async fn list_folders(&self, class: &Classification) -> Result<Vec<String>> {
        let header = Self::header(OpCode::ListFolders, class);
        let ack = self.exchange(&header).await?;
        Self::parse_result(ack)
    }

    /// Aggregate stats of a classification's folder.
    pub async fn folder_stats(&self, class: &Classification) -> Result<FolderStats> {
        let header = Self::header(OpCode::FolderStats, class);
        let ack = self.exchange(&header).await?;
        Self::parse_result(ack)
    }

    /// Stats for every immediate subfolder of a classification.
    pub async fn folder_stats_all(&self, class: &Classification) -> Result<Vec<FolderStatsEntry>> {
        let header = Self::header(OpCode::FolderStatsAll, class);
        let ack = self.exchange(&header).await?;
        Self::parse_result(ack)
    }

    fn parse_result<T: serde::de::DeserializeOwned>(ack: Ack) -> Result<T> {
        if !ack.is_ok() {
            return Err(DepotError::Remote(ack.message));
        }
        serde_json::from_str(&ack.message)
            .map_err(|e| DepotError::Protocol(format!("malformed result payload: {e}")))
    }
}
