//! Chunked file transfer.
//!
//! # Sender protocol
//!
//! 1. Assign a transfer id (strictly increasing, millisecond-based).
//! 2. Send `{type: "file-info", id, name, size, fileType}`.
//! 3. Read one chunk of at most [`CHUNK_SIZE`] bytes, send it on the active
//!    channel, and only then read the next one.
//! 4. After every chunk advance `offset` and recompute progress.
//! 5. At `offset == size` send `{type: "file-complete", id}` and move the
//!    transfer to the transferred-files list.
//!
//! The orchestrator drives steps 3-5 one chunk per queued event, so other
//! session events interleave between chunks. A vanished channel or a read
//! error aborts the transfer; the remote side is not told.
//!
//! Inbound reassembly lives in [`receiver`].

// Rust guideline compliant 2026-02

pub mod receiver;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

use crate::constants::CHUNK_SIZE;
use crate::error::SessionError;
use crate::inspect::Direction;
use crate::signaling::FileInfo;

pub use receiver::{CompletedFile, Reassembler};

/// Source of file bytes.
#[async_trait]
pub trait ChunkReader: Send + fmt::Debug {
    /// Read up to `max` bytes. An empty result means end of file.
    async fn read_chunk(&mut self, max: usize) -> std::io::Result<Vec<u8>>;
}

#[async_trait]
impl ChunkReader for tokio::fs::File {
    async fn read_chunk(&mut self, max: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let mut filled = 0;
        // Fill the whole chunk unless EOF comes first
        while filled < max {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// `progress = clamp(round(offset / size * 100), 0, 100)`; an empty file is 100.
pub fn progress_percent(offset: u64, size: u64) -> u8 {
    if size == 0 {
        return 100;
    }
    let pct = (offset as f64 / size as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// MIME type guessed from the file extension.
pub fn mime_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt" | "log") => "text/plain",
        Some("json") => "application/json",
        Some("html" | "htm") => "text/html",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// An outgoing transfer in progress.
#[derive(Debug)]
pub struct OutboundTransfer {
    info: FileInfo,
    offset: u64,
    chunk_size: usize,
    progress: u8,
    reader: Box<dyn ChunkReader>,
}

impl OutboundTransfer {
    /// Transfer announcement.
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Bytes sent so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Last reported progress.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// True once every byte has been sent.
    pub fn is_complete(&self) -> bool {
        self.offset >= self.info.size
    }

    /// Read the next chunk without advancing.
    pub async fn read_next(&mut self) -> Result<Vec<u8>, SessionError> {
        let remaining = self.info.size - self.offset;
        let max = self.chunk_size.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let chunk = self
            .reader
            .read_chunk(max)
            .await
            .map_err(|e| SessionError::FileIo(e.to_string()))?;
        if chunk.is_empty() {
            return Err(SessionError::FileIo(format!(
                "unexpected end of file at {} of {} bytes",
                self.offset, self.info.size
            )));
        }
        Ok(chunk)
    }

    /// Record a sent chunk and return the new progress.
    pub fn advance(&mut self, sent: usize) -> u8 {
        self.offset = (self.offset + sent as u64).min(self.info.size);
        self.progress = progress_percent(self.offset, self.info.size);
        self.progress
    }
}

/// A finished transfer in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferredFile {
    /// Transfer id.
    pub id: u64,
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type.
    pub file_type: String,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Sent or received.
    pub direction: Direction,
}

/// Owns outgoing transfers, the inbound reassembler and the history.
#[derive(Debug, Default)]
pub struct FileTransferEngine {
    last_id: u64,
    pending: HashMap<u64, OutboundTransfer>,
    transferred: Vec<TransferredFile>,
    inbound: Reassembler,
}

impl FileTransferEngine {
    /// Engine whose inbound files are written to `download_dir`.
    pub fn new(download_dir: Option<std::path::PathBuf>) -> Self {
        Self {
            inbound: Reassembler::new(download_dir),
            ..Self::default()
        }
    }

    /// Next transfer id: the current time in ms, bumped past the last id.
    pub fn next_id(&mut self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.last_id = now.max(self.last_id + 1);
        self.last_id
    }

    /// Open `path` for sending.
    pub async fn open(&mut self, path: &Path) -> Result<FileInfo, SessionError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SessionError::FileIo(format!("{}: {e}", path.display())))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| SessionError::FileIo(format!("{}: {e}", path.display())))?
            .len();
        let name = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());
        Ok(self.begin(name, size, Box::new(file)))
    }

    /// Register a transfer reading from `reader`.
    pub fn begin(&mut self, name: String, size: u64, reader: Box<dyn ChunkReader>) -> FileInfo {
        let info = FileInfo {
            id: self.next_id(),
            file_type: mime_for(&name).to_string(),
            name,
            size,
        };
        self.pending.insert(
            info.id,
            OutboundTransfer {
                info: info.clone(),
                offset: 0,
                chunk_size: CHUNK_SIZE,
                progress: 0,
                reader,
            },
        );
        info
    }

    /// Transfer in progress.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut OutboundTransfer> {
        self.pending.get_mut(&id)
    }

    /// Move a finished transfer to history.
    pub fn finish(&mut self, id: u64) -> Option<TransferredFile> {
        let transfer = self.pending.remove(&id)?;
        let record = TransferredFile {
            id,
            name: transfer.info.name,
            size: transfer.info.size,
            file_type: transfer.info.file_type,
            timestamp: Utc::now(),
            direction: Direction::Outgoing,
        };
        self.transferred.push(record.clone());
        Some(record)
    }

    /// Drop a transfer without completing it.
    pub fn abort(&mut self, id: u64, reason: &SessionError) {
        if let Some(transfer) = self.pending.remove(&id) {
            log::error!(
                "[Transfer] Aborted '{}' at {}/{} bytes: {reason}",
                transfer.info.name,
                transfer.offset,
                transfer.info.size
            );
        }
    }

    /// Drop every outgoing transfer.
    pub fn abort_all(&mut self) {
        let ids: Vec<u64> = self.pending.keys().copied().collect();
        for id in ids {
            self.abort(id, &SessionError::NoSession);
        }
    }

    /// Record a completed inbound file.
    pub fn record_incoming(&mut self, file: &CompletedFile) -> TransferredFile {
        let record = TransferredFile {
            id: file.info.id,
            name: file.info.name.clone(),
            size: file.data.len() as u64,
            file_type: file.info.file_type.clone(),
            timestamp: Utc::now(),
            direction: Direction::Incoming,
        };
        self.transferred.push(record.clone());
        record
    }

    /// Number of outgoing transfers in progress.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Completed transfers, oldest first.
    pub fn transferred(&self) -> &[TransferredFile] {
        &self.transferred
    }

    /// Inbound reassembly state.
    pub fn inbound(&mut self) -> &mut Reassembler {
        &mut self.inbound
    }
}
