//! Driving outgoing file transfers one chunk per event.

use std::path::Path;

use crate::channels::QueuedMessage;
use crate::engine::Payload;
use crate::error::SessionError;
use crate::signaling::{FileInfo, SignalingMessage};

use super::{ConnectionOrchestrator, SessionEvent};

/// Transfer control envelope carried on a data channel, if `payload` is one.
pub(super) fn control_message(payload: &Payload) -> Option<SignalingMessage> {
    let bytes = payload.as_bytes();
    if bytes.iter().find(|b| !b.is_ascii_whitespace()) != Some(&b'{') {
        return None;
    }
    match SignalingMessage::decode_bytes(bytes) {
        Ok(message @ (SignalingMessage::FileInfo(_) | SignalingMessage::FileComplete { .. })) => {
            Some(message)
        }
        _ => None,
    }
}

impl ConnectionOrchestrator {
    /// Start sending the file at `path` on the active channel.
    pub async fn send_file(&mut self, path: &Path) -> Result<u64, SessionError> {
        if self.channels.active_open().is_none() {
            log::error!("[Transfer] Cannot send {}: no open channel", path.display());
            return Err(SessionError::ChannelSend("no open channel".to_string()));
        }
        // Backlog goes out before the announcement
        self.drain().await;
        let info = self.transfers.open(path).await.map_err(|e| {
            log::error!("[Transfer] {e}");
            e
        })?;
        self.start_transfer(info).await
    }

    /// Announce a registered transfer and queue its first chunk.
    ///
    /// An announcement that cannot be delivered aborts the transfer instead
    /// of being queued: a late `file-info` would make the peer capture
    /// unrelated binary messages as file data.
    pub(super) async fn start_transfer(&mut self, info: FileInfo) -> Result<u64, SessionError> {
        log::info!(
            "[Transfer] Sending '{}' ({} bytes, {})",
            info.name,
            info.size,
            info.file_type
        );
        let announce = Payload::Text(SignalingMessage::FileInfo(info.clone()).encode());
        if let Err(e) = self.try_deliver(&announce).await {
            self.transfers.abort(info.id, &e);
            self.drain().await;
            return Err(e);
        }
        self.schedule_step(info.id);
        Ok(info.id)
    }

    fn schedule_step(&self, id: u64) {
        let Some(epoch) = self.session.as_ref().map(|s| s.epoch) else {
            return;
        };
        let _ = self.events.send(SessionEvent::TransferStep { epoch, id });
    }

    /// Send the next chunk of transfer `id`, or finish it.
    pub(super) async fn transfer_step(&mut self, id: u64) {
        let Some(transfer) = self.transfers.get_mut(id) else {
            return;
        };
        if transfer.is_complete() {
            let report_done = transfer.progress() < 100;
            self.complete_transfer(id, report_done).await;
            return;
        }
        if self.channels.active_open().is_none() {
            self.transfers
                .abort(id, &SessionError::ChannelSend("channel closed".to_string()));
            return;
        }
        if let Err(e) = self.send_chunk(id).await {
            self.transfers.abort(id, &e);
            self.drain().await;
        }
    }

    async fn send_chunk(&mut self, id: u64) -> Result<(), SessionError> {
        let Some(transfer) = self.transfers.get_mut(id) else {
            return Ok(());
        };
        let chunk = transfer.read_next().await?;
        let size = chunk.len();
        self.try_deliver(&Payload::Binary(chunk)).await?;

        if let Some(progress) = self.transfers.get_mut(id).map(|t| t.advance(size)) {
            self.note_progress(id, progress);
            self.schedule_step(id);
        }
        Ok(())
    }

    /// Send `file-complete` and move the transfer to history.
    ///
    /// Every byte is already out, so an undelivered completion is queued
    /// ahead of the messages held back during the transfer.
    async fn complete_transfer(&mut self, id: u64, report_done: bool) {
        let complete = Payload::Text(SignalingMessage::FileComplete { id }.encode());
        let delivered = self.try_deliver(&complete).await;
        if report_done {
            self.note_progress(id, 100);
        }
        if let Some(done) = self.transfers.finish(id) {
            log::info!("[Transfer] Sent '{}' ({} bytes)", done.name, done.size);
        }
        match delivered {
            Ok(()) => self.drain().await,
            Err(e) => {
                log::warn!("[Transfer] file-complete for {id} queued: {e}");
                self.queue.push_front(QueuedMessage::new(complete));
            }
        }
    }

    fn note_progress(&mut self, id: u64, progress: u8) {
        log::debug!("[Transfer] {id}: {progress}%");
        self.inspector.note(&format!("Transfer {id}: {progress}%"));
    }
}
