//! Outbound delivery, queue draining and engine event handling.

use std::path::Path;

use crate::channels::{OpenOutcome, QueuedMessage};
use crate::constants::PREVIEW_LEN;
use crate::engine::{ChannelId, EngineEvent, Payload, PeerState};
use crate::error::SessionError;
use crate::inspect::{truncate_text, Direction, InspectionRecord, Route};
use crate::signaling::SignalingMessage;
use crate::stats::format_bytes;
use crate::transfer::receiver;

use super::{transfer, ConnectionOrchestrator, NegotiationState};

/// What happened to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent on the active channel.
    Delivered,
    /// Waiting in the queue for an open channel.
    Queued,
    /// Not sent and not queued.
    Dropped,
}

impl ConnectionOrchestrator {
    /// Send `payload` on the active channel, queueing it if that fails.
    pub async fn send(&mut self, payload: Payload) -> Delivery {
        self.send_with(payload, true).await
    }

    /// Send `payload`; when `requeue` is false a failed send drops it.
    ///
    /// Anything already queued goes out first so arrival order matches
    /// submission order. While a file is being sent, messages wait in the
    /// queue: the peer appends every unframed payload to the file.
    pub async fn send_with(&mut self, payload: Payload, requeue: bool) -> Delivery {
        if self.transfer_in_progress() {
            log::debug!("[Queue] Holding message until the transfer finishes");
        } else {
            self.drain().await;
            if self.queue.is_empty() {
                match self.try_deliver(&payload).await {
                    Ok(()) => return Delivery::Delivered,
                    Err(e) => log::debug!("[Queue] Direct send failed: {e}"),
                }
            }
        }
        if requeue {
            self.queue.enqueue(QueuedMessage::new(payload));
            Delivery::Queued
        } else {
            Delivery::Dropped
        }
    }

    /// One send attempt on the open active channel.
    pub(super) async fn try_deliver(&mut self, payload: &Payload) -> Result<(), SessionError> {
        let Some(id) = self.channels.active_open() else {
            return Err(SessionError::ChannelSend("no open channel".to_string()));
        };
        let Some(engine) = self.engine.as_ref() else {
            return Err(SessionError::NoSession);
        };
        engine
            .transport
            .send(id, payload)
            .await
            .map_err(|e| SessionError::ChannelSend(e.to_string()))?;

        self.counters.sent(payload.len());
        let route = Route::Channel(self.channel_label(id));
        self.inspector.record(InspectionRecord::new(
            Direction::Outgoing,
            route,
            payload.as_bytes(),
        ));
        Ok(())
    }

    pub(super) fn transfer_in_progress(&self) -> bool {
        self.transfers.pending_count() > 0
    }

    /// Deliver queued messages in order until one fails.
    ///
    /// The failed message goes back to the head of the queue. Nothing is
    /// drained while a file is being sent.
    pub(super) async fn drain(&mut self) {
        if self.queue.is_empty()
            || self.channels.active_open().is_none()
            || self.transfer_in_progress()
        {
            return;
        }
        let mut delivered = 0usize;
        while let Some(message) = self.queue.pop_front() {
            if let Err(e) = self.try_deliver(&message.payload).await {
                log::warn!("[Queue] Delivery failed, {} left queued: {e}", self.queue.len() + 1);
                self.queue.push_front(message);
                break;
            }
            delivered += 1;
        }
        if delivered > 0 {
            log::info!(
                "[Queue] Delivered {delivered} queued messages ({} left)",
                self.queue.len()
            );
        }
    }

    fn channel_label(&self, id: ChannelId) -> String {
        self.channels
            .by_id(id)
            .map_or_else(|| id.to_string(), |c| c.label.clone())
    }

    pub(super) async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::IceCandidate(candidate) => {
                // Send failures are logged by the signaling channel
                let _ = self
                    .send_signaling(&SignalingMessage::Candidate(candidate))
                    .await;
            }
            EngineEvent::ConnectionState(state) => self.on_peer_state(state).await,
            EngineEvent::DataChannel { id, label, options } => {
                if let Some(engine) = self.engine.as_ref() {
                    self.channels
                        .register_remote(engine.transport.as_ref(), id, &label, options);
                }
            }
            EngineEvent::ChannelOpen(id) => {
                if self.channels.on_open(id) != OpenOutcome::Ignored {
                    self.sync_active();
                    self.drain().await;
                }
            }
            EngineEvent::ChannelClose(id) => {
                let promoted = self.channels.on_close(id);
                self.sync_active();
                if promoted.is_some() {
                    self.drain().await;
                }
            }
            EngineEvent::ChannelError { id, message } => self.channels.on_error(id, &message),
            EngineEvent::ChannelMessage { id, payload } => {
                self.on_channel_message(id, payload).await;
            }
        }
    }

    async fn on_peer_state(&mut self, state: PeerState) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.peer_state == state {
            return;
        }
        engine.peer_state = state;
        log::info!("[Peer] Connection state: {state}");

        match state {
            PeerState::Connected => {
                if let Some(session) = self.session.as_mut().filter(|s| s.is_live()) {
                    session.state = NegotiationState::Connected;
                }
                self.drain().await;
            }
            PeerState::Failed => log::error!("[Peer] Connection failed, use /reconnect to retry"),
            _ => {}
        }
    }

    async fn on_channel_message(&mut self, id: ChannelId, payload: Payload) {
        let label = self.channel_label(id);
        self.counters.received(payload.len());
        self.inspector.record(InspectionRecord::new(
            Direction::Incoming,
            Route::Channel(label.clone()),
            payload.as_bytes(),
        ));

        if let Some(control) = transfer::control_message(&payload) {
            self.on_transfer_control(control).await;
            return;
        }
        if let Payload::Binary(bytes) = &payload {
            if self.transfers.inbound().on_chunk(bytes) {
                return;
            }
        }

        match &payload {
            Payload::Text(text) => {
                log::info!("[{label}] {}", truncate_text(text, PREVIEW_LEN));
            }
            Payload::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => log::info!("[{label}] {}", truncate_text(text, PREVIEW_LEN)),
                Err(_) => log::info!("[{label}] <binary {} bytes>", bytes.len()),
            },
        }
    }

    async fn on_transfer_control(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::FileInfo(info) => self.transfers.inbound().on_info(info),
            SignalingMessage::FileComplete { id } => {
                let Some(file) = self.transfers.inbound().on_complete(id) else {
                    return;
                };
                let record = self.transfers.record_incoming(&file);
                log::info!(
                    "[Transfer] Received '{}' ({})",
                    record.name,
                    format_bytes(record.size)
                );
                let Some(dir) = self.transfers.inbound().download_dir().map(Path::to_path_buf)
                else {
                    return;
                };
                match receiver::save(&dir, &file).await {
                    Ok(path) => log::info!("[Transfer] Saved to {}", path.display()),
                    Err(e) => log::error!("[Transfer] Failed to save '{}': {e:#}", record.name),
                }
            }
            _ => {}
        }
    }
}
