//! Inbound file reassembly.
//!
//! A `file-info` control message opens a transfer keyed by its id and makes
//! it current. Binary channel messages are appended, in arrival order, to
//! the current transfer. `file-complete` with a matching id closes it.
//! There is no offset field on the wire, so nothing beyond arrival order is
//! used to place chunks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::signaling::FileInfo;

#[derive(Debug)]
struct InboundTransfer {
    info: FileInfo,
    data: Vec<u8>,
}

/// A fully received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    /// Announcement from the sender.
    pub info: FileInfo,
    /// Reassembled bytes.
    pub data: Vec<u8>,
}

impl CompletedFile {
    /// True when the received byte count matches the announced size.
    pub fn size_matches(&self) -> bool {
        self.data.len() as u64 == self.info.size
    }
}

/// Receiver-side transfer state.
#[derive(Debug, Default)]
pub struct Reassembler {
    transfers: HashMap<u64, InboundTransfer>,
    current: Option<u64>,
    download_dir: Option<PathBuf>,
}

impl Reassembler {
    /// Reassembler saving into `download_dir` when set.
    pub fn new(download_dir: Option<PathBuf>) -> Self {
        Self {
            download_dir,
            ..Self::default()
        }
    }

    /// Start receiving `info`. It becomes the current transfer.
    pub fn on_info(&mut self, info: FileInfo) {
        log::info!(
            "[Transfer] Incoming '{}' ({} bytes, {})",
            info.name,
            info.size,
            info.file_type
        );
        let id = info.id;
        let capacity = usize::try_from(info.size).unwrap_or(0).min(64 * 1024 * 1024);
        self.transfers.insert(
            id,
            InboundTransfer {
                info,
                data: Vec::with_capacity(capacity),
            },
        );
        self.current = Some(id);
    }

    /// Append a chunk to the current transfer. Returns `false` if none is current.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> bool {
        let Some(transfer) = self.current.and_then(|id| self.transfers.get_mut(&id)) else {
            return false;
        };
        transfer.data.extend_from_slice(chunk);
        true
    }

    /// Finish transfer `id`.
    pub fn on_complete(&mut self, id: u64) -> Option<CompletedFile> {
        let Some(transfer) = self.transfers.remove(&id) else {
            log::warn!("[Transfer] file-complete for unknown transfer {id}");
            return None;
        };
        if self.current == Some(id) {
            self.current = None;
        }
        let file = CompletedFile {
            info: transfer.info,
            data: transfer.data,
        };
        if !file.size_matches() {
            log::warn!(
                "[Transfer] '{}' received {} bytes, announced {}",
                file.info.name,
                file.data.len(),
                file.info.size
            );
        }
        Some(file)
    }

    /// Discard unfinished transfers.
    pub fn reset(&mut self) {
        self.transfers.clear();
        self.current = None;
    }

    /// Destination directory, if configured.
    pub fn download_dir(&self) -> Option<&Path> {
        self.download_dir.as_deref()
    }
}

/// Strip directory components and characters unsafe in file names.
pub fn sanitize_file_name(name: &str, id: u64) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || ":*?\"<>|".contains(c) { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        format!("download-{id}")
    } else {
        trimmed.to_string()
    }
}

/// Write `file` into `dir` and return the written path.
pub async fn save(dir: &Path, file: &CompletedFile) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(sanitize_file_name(&file.info.name, file.info.id));
    tokio::fs::write(&path, &file.data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
