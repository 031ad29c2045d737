//! Wire frames for the DEPOT protocol.
//!
//! All frames are binary, big-endian, and carried over one TCP stream:
//!
//! ```text
//! command  = op:u8
//!            factory group identify file_name uploader tag   (6 strings)
//!            count:u32 file_name*                            (batch delete)
//! string   = len:u32 utf8-bytes
//! ack      = status:i32 message:string
//! payload  = len:u64 raw-bytes
//! ```
//!
//! File bytes follow a ready-ack handshake; list and stat results ride in
//! the ack message as JSON.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{DepotError, Result};

/// Status code for a successful operation (or "found" for Exists).
pub const STATUS_OK: i32 = 1;

/// Status code for a failed operation (or "not found" for Exists).
pub const STATUS_ERROR: i32 = 0;

/// Upper bound for any string carried in a frame.
pub const MAX_STRING_LENGTH: usize = 4096;

/// Upper bound for the batch-delete name list.
pub const MAX_NAME_LIST: usize = 10_000;

/// Operation codes understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Download = 1,
    Upload = 2,
    DeleteOne = 3,
    DeleteMany = 4,
    DeleteFolder = 5,
    DeleteEmptyFolders = 6,
    ListFiles = 7,
    ListFolders = 8,
    Exists = 9,
    FolderStats = 10,
    FolderStatsAll = 11,
}

impl TryFrom<u8> for OpCode {
    type Error = DepotError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(OpCode::Download),
            2 => Ok(OpCode::Upload),
            3 => Ok(OpCode::DeleteOne),
            4 => Ok(OpCode::DeleteMany),
            5 => Ok(OpCode::DeleteFolder),
            6 => Ok(OpCode::DeleteEmptyFolders),
            7 => Ok(OpCode::ListFiles),
            8 => Ok(OpCode::ListFolders),
            9 => Ok(OpCode::Exists),
            10 => Ok(OpCode::FolderStats),
            11 => Ok(OpCode::FolderStatsAll),
            other => Err(DepotError::Protocol(format!(
                "unknown operation code {other}"
            ))),
        }
    }
}

/// One decoded command header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHeader {
    /// Requested operation.
    pub op: OpCode,
    /// Factory classification level (may be empty).
    pub factory: String,
    /// Group classification level (may be empty).
    pub group: String,
    /// Identify classification level (may be empty).
    pub identify: String,
    /// Display file name (empty for folder-level operations).
    pub file_name: String,
    /// Uploader identity (upload only).
    pub uploader: String,
    /// Free-form tag (upload only).
    pub tag: String,
    /// File name list (batch delete only).
    pub file_names: Vec<String>,
}

impl CommandHeader {
    /// Create a header with empty auxiliary fields.
    pub fn new(op: OpCode) -> Self {
        Self {
            op,
            factory: String::new(),
            group: String::new(),
            identify: String::new(),
            file_name: String::new(),
            uploader: String::new(),
            tag: String::new(),
            file_names: Vec::new(),
        }
    }

    /// Set the classification levels.
    pub fn with_classification(
        mut self,
        factory: impl Into<String>,
        group: impl Into<String>,
        identify: impl Into<String>,
    ) -> Self {
        self.factory = factory.into();
        self.group = group.into();
        self.identify = identify.into();
        self
    }

    /// Set the display file name.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Set the uploader identity.
    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = uploader.into();
        self
    }

    /// Set the tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Set the batch file name list.
    pub fn with_file_names(mut self, file_names: Vec<String>) -> Self {
        self.file_names = file_names;
        self
    }
}

/// Acknowledgement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// 1 for success/found, 0 for failure/not-found.
    pub status: i32,
    /// Human-readable message or JSON result payload.
    pub message: String,
}

impl Ack {
    /// Successful acknowledgement.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK,
            message: message.into(),
        }
    }

    /// Failed acknowledgement.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR,
            message: message.into(),
        }
    }

    /// Whether the acknowledged operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

async fn write_string<W>(writer: &mut W, s: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if s.len() > MAX_STRING_LENGTH {
        return Err(DepotError::Protocol(format!(
            "string of {} bytes exceeds frame limit",
            s.len()
        )));
    }
    writer.write_u32(s.len() as u32).await?;
    writer.write_all(s.as_bytes()).await?;
    Ok(())
}

async fn read_string<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_STRING_LENGTH {
        return Err(DepotError::Protocol(format!(
            "string of {len} bytes exceeds frame limit"
        )));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| DepotError::Protocol("string is not valid UTF-8".to_string()))
}

/// Encode a command header.
pub async fn write_command<W>(writer: &mut W, header: &CommandHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u8(header.op as u8).await?;
    write_string(writer, &header.factory).await?;
    write_string(writer, &header.group).await?;
    write_string(writer, &header.identify).await?;
    write_string(writer, &header.file_name).await?;
    write_string(writer, &header.uploader).await?;
    write_string(writer, &header.tag).await?;

    if header.file_names.len() > MAX_NAME_LIST {
        return Err(DepotError::Protocol(format!(
            "name list of {} entries exceeds frame limit",
            header.file_names.len()
        )));
    }
    writer.write_u32(header.file_names.len() as u32).await?;
    for name in &header.file_names {
        write_string(writer, name).await?;
    }

    writer.flush().await?;
    Ok(())
}

/// Decode a command header.
pub async fn read_command<R>(reader: &mut R) -> Result<CommandHeader>
where
    R: AsyncRead + Unpin,
{
    let op = OpCode::try_from(reader.read_u8().await?)?;
    let factory = read_string(reader).await?;
    let group = read_string(reader).await?;
    let identify = read_string(reader).await?;
    let file_name = read_string(reader).await?;
    let uploader = read_string(reader).await?;
    let tag = read_string(reader).await?;

    let count = reader.read_u32().await? as usize;
    if count > MAX_NAME_LIST {
        return Err(DepotError::Protocol(format!(
            "name list of {count} entries exceeds frame limit"
        )));
    }
    let mut file_names = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        file_names.push(read_string(reader).await?);
    }

    Ok(CommandHeader {
        op,
        factory,
        group,
        identify,
        file_name,
        uploader,
        tag,
        file_names,
    })
}

/// Encode an acknowledgement frame.
pub async fn write_ack<W>(writer: &mut W, ack: &Ack) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i32(ack.status).await?;
    write_string(writer, &ack.message).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode an acknowledgement frame.
pub async fn read_ack<R>(reader: &mut R) -> Result<Ack>
where
    R: AsyncRead + Unpin,
{
    let status = reader.read_i32().await?;
    let message = read_string(reader).await?;
    Ok(Ack { status, message })
}

/// Write the length prefix of a file payload. The raw bytes follow.
pub async fn write_payload_len<W>(writer: &mut W, len: u64) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u64(len).await?;
    Ok(())
}

/// Read the length prefix of a file payload. The raw bytes follow.
pub async fn read_payload_len<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    Ok(reader.read_u64().await?)
}
