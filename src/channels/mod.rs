//! Data channel bookkeeping and active-channel selection.
//!
//! [`DataChannelManager`] holds one [`DataChannelDescriptor`] per label, in
//! creation order. Engine events address channels by [`ChannelId`]; the
//! label is only the operator-facing key. Creating a channel under a label
//! already in use first closes the previous channel through the engine, so
//! a replaced channel is never left open and unreferenced.
//!
//! Active-channel rules:
//! - on open, a channel becomes active if nothing is active;
//! - on close of the active channel, the first open channel in creation
//!   order is promoted, or nothing is active.

// Rust guideline compliant 2026-02

pub mod queue;

use std::fmt;

use crate::engine::{ChannelId, ChannelOptions, PeerTransport};
use crate::error::SessionError;

pub use queue::{MessageQueue, QueuedMessage};

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Created, not yet open.
    Connecting,
    /// Usable for sends.
    Open,
    /// Closed; never reopens.
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// What the session knows about one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelDescriptor {
    /// Engine id.
    pub id: ChannelId,
    /// Operator-facing label, unique within the manager.
    pub label: String,
    /// Ordered delivery.
    pub ordered: bool,
    /// Retransmit limit.
    pub max_retransmits: Option<u16>,
    /// Lifecycle state.
    pub ready_state: ReadyState,
    /// Announced by the remote peer rather than created locally.
    pub remote: bool,
}

/// Result of an open transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The channel opened and is now the active channel.
    BecameActive,
    /// The channel opened; another channel stays active.
    Opened,
    /// Unknown id or already open.
    Ignored,
}

/// Tracks channels by label and designates the active one.
#[derive(Debug, Default)]
pub struct DataChannelManager {
    channels: Vec<DataChannelDescriptor>,
    active: Option<ChannelId>,
}

impl DataChannelManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a local channel through `engine`.
    ///
    /// Fails when no engine (session) exists or the engine refuses.
    pub async fn create(
        &mut self,
        engine: Option<&dyn PeerTransport>,
        label: &str,
        options: ChannelOptions,
    ) -> Result<ChannelId, SessionError> {
        let Some(engine) = engine else {
            log::error!("[DataChannel] Cannot create '{label}': no peer connection");
            return Err(SessionError::NoSession);
        };

        self.evict_label(engine, label);

        let id = engine
            .create_data_channel(label, &options)
            .await
            .map_err(|e| {
                log::error!("[DataChannel] Failed to create '{label}': {e}");
                SessionError::ChannelSend(e.to_string())
            })?;

        self.channels.push(DataChannelDescriptor {
            id,
            label: label.to_string(),
            ordered: options.ordered,
            max_retransmits: options.max_retransmits,
            ready_state: ReadyState::Connecting,
            remote: false,
        });
        log::info!("[DataChannel] Created '{label}' ({id})");
        Ok(id)
    }

    /// Register a channel announced by the remote peer.
    pub fn register_remote(
        &mut self,
        engine: &dyn PeerTransport,
        id: ChannelId,
        label: &str,
        options: ChannelOptions,
    ) {
        if self.by_id(id).is_some() {
            return;
        }
        self.evict_label(engine, label);
        self.channels.push(DataChannelDescriptor {
            id,
            label: label.to_string(),
            ordered: options.ordered,
            max_retransmits: options.max_retransmits,
            ready_state: ReadyState::Connecting,
            remote: true,
        });
        log::info!("[DataChannel] Remote channel '{label}' ({id})");
    }

    /// Close-before-replace for a label about to be reused.
    fn evict_label(&mut self, engine: &dyn PeerTransport, label: &str) {
        if let Some(old) = self.channels.iter().find(|c| c.label == label).map(|c| c.id) {
            log::info!("[DataChannel] Replacing existing channel '{label}' ({old})");
            engine.close_channel(old);
            self.on_close(old);
            self.channels.retain(|c| c.id != old);
        }
    }

    /// Apply an open event.
    pub fn on_open(&mut self, id: ChannelId) -> OpenOutcome {
        let Some(channel) = self.channels.iter_mut().find(|c| c.id == id) else {
            return OpenOutcome::Ignored;
        };
        if channel.ready_state != ReadyState::Connecting {
            return OpenOutcome::Ignored;
        }
        channel.ready_state = ReadyState::Open;
        log::info!("[DataChannel] '{}' open", channel.label);

        if self.active.is_none() {
            self.active = Some(id);
            log::info!("[DataChannel] Active channel: '{}'", channel.label);
            OpenOutcome::BecameActive
        } else {
            OpenOutcome::Opened
        }
    }

    /// Apply a close event. Returns the newly promoted channel, if any.
    pub fn on_close(&mut self, id: ChannelId) -> Option<ChannelId> {
        let channel = self.channels.iter_mut().find(|c| c.id == id)?;
        if channel.ready_state == ReadyState::Closed {
            return None;
        }
        channel.ready_state = ReadyState::Closed;
        log::info!("[DataChannel] '{}' closed", channel.label);

        if self.active != Some(id) {
            return None;
        }
        self.active = self
            .channels
            .iter()
            .find(|c| c.ready_state == ReadyState::Open)
            .map(|c| c.id);
        match self.active_channel() {
            Some(next) => log::info!("[DataChannel] Active channel: '{}'", next.label),
            None => log::info!("[DataChannel] No open channel left"),
        }
        self.active
    }

    /// Log a channel error. No state changes.
    pub fn on_error(&self, id: ChannelId, message: &str) {
        let label = self.by_id(id).map_or("?", |c| c.label.as_str());
        log::error!("[DataChannel] '{label}' ({id}) error: {message}");
    }

    /// Close the channel labelled `label` and forget it.
    pub fn close(&mut self, engine: Option<&dyn PeerTransport>, label: &str) -> bool {
        let Some(id) = self.get(label).map(|c| c.id) else {
            log::warn!("[DataChannel] No channel named '{label}'");
            return false;
        };
        if let Some(engine) = engine {
            engine.close_channel(id);
        }
        self.on_close(id);
        self.channels.retain(|c| c.id != id);
        true
    }

    /// Close every channel and forget them all.
    pub fn clear(&mut self, engine: Option<&dyn PeerTransport>) {
        if let Some(engine) = engine {
            for channel in &self.channels {
                if channel.ready_state != ReadyState::Closed {
                    engine.close_channel(channel.id);
                }
            }
        }
        self.channels.clear();
        self.active = None;
    }

    /// Descriptor by label.
    pub fn get(&self, label: &str) -> Option<&DataChannelDescriptor> {
        self.channels.iter().find(|c| c.label == label)
    }

    /// Descriptor by engine id.
    pub fn by_id(&self, id: ChannelId) -> Option<&DataChannelDescriptor> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// The active channel's descriptor.
    pub fn active_channel(&self) -> Option<&DataChannelDescriptor> {
        self.active.and_then(|id| self.by_id(id))
    }

    /// Id of the active channel if it is open.
    pub fn active_open(&self) -> Option<ChannelId> {
        self.active_channel()
            .filter(|c| c.ready_state == ReadyState::Open)
            .map(|c| c.id)
    }

    /// Number of tracked channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True when no channel is tracked.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    async fn manager_with(engine: &MockTransport, labels: &[&str]) -> (DataChannelManager, Vec<ChannelId>) {
        let mut manager = DataChannelManager::new();
        let mut ids = Vec::new();
        for label in labels {
            ids.push(
                manager
                    .create(Some(engine), label, ChannelOptions::default())
                    .await
                    .unwrap(),
            );
        }
        (manager, ids)
    }

    #[tokio::test]
    async fn test_create_without_session_fails() {
        let mut manager = DataChannelManager::new();
        let result = manager.create(None, "chat", ChannelOptions::default()).await;
        assert_eq!(result, Err(SessionError::NoSession));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_first_open_becomes_active() {
        let engine = MockTransport::default();
        let (mut manager, ids) = manager_with(&engine, &["a", "b"]).await;

        assert_eq!(manager.get("a").unwrap().ready_state, ReadyState::Connecting);
        assert_eq!(manager.on_open(ids[1]), OpenOutcome::BecameActive);
        assert_eq!(manager.on_open(ids[0]), OpenOutcome::Opened);
        assert_eq!(manager.active_open(), Some(ids[1]));
        // Repeated open is a no-op
        assert_eq!(manager.on_open(ids[1]), OpenOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_close_of_active_promotes_first_open_in_creation_order() {
        let engine = MockTransport::default();
        let (mut manager, ids) = manager_with(&engine, &["a", "b", "c"]).await;
        manager.on_open(ids[2]);
        manager.on_open(ids[1]);
        manager.on_open(ids[0]);

        assert_eq!(manager.on_close(ids[2]), Some(ids[0]));
        assert_eq!(manager.active_channel().unwrap().label, "a");
    }

    #[tokio::test]
    async fn test_close_of_inactive_keeps_active() {
        let engine = MockTransport::default();
        let (mut manager, ids) = manager_with(&engine, &["a", "b"]).await;
        manager.on_open(ids[0]);
        manager.on_open(ids[1]);

        assert_eq!(manager.on_close(ids[1]), None);
        assert_eq!(manager.active_open(), Some(ids[0]));
    }

    #[tokio::test]
    async fn test_close_of_last_open_clears_active() {
        let engine = MockTransport::default();
        let (mut manager, ids) = manager_with(&engine, &["a", "b"]).await;
        manager.on_open(ids[0]);

        assert_eq!(manager.on_close(ids[0]), None);
        assert!(manager.active_channel().is_none());
        // b opening later becomes active
        assert_eq!(manager.on_open(ids[1]), OpenOutcome::BecameActive);
    }

    #[tokio::test]
    async fn test_same_label_closes_previous_channel() {
        let engine = MockTransport::default();
        let (mut manager, ids) = manager_with(&engine, &["chat"]).await;
        manager.on_open(ids[0]);

        let replacement = manager
            .create(Some(&engine), "chat", ChannelOptions { ordered: false, max_retransmits: Some(2) })
            .await
            .unwrap();

        assert_ne!(replacement, ids[0]);
        assert_eq!(engine.closed_channels(), vec![ids[0]]);
        assert_eq!(manager.len(), 1);
        let chat = manager.get("chat").unwrap();
        assert_eq!(chat.id, replacement);
        assert_eq!(chat.max_retransmits, Some(2));
        assert!(manager.active_channel().is_none());

        // Late close event for the replaced channel is ignored
        assert_eq!(manager.on_close(ids[0]), None);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_events_for_unknown_ids_are_ignored() {
        let mut manager = DataChannelManager::new();
        assert_eq!(manager.on_open(ChannelId(99)), OpenOutcome::Ignored);
        assert_eq!(manager.on_close(ChannelId(99)), None);
    }

    #[tokio::test]
    async fn test_remote_registration_and_explicit_close() {
        let engine = MockTransport::default();
        let mut manager = DataChannelManager::new();
        manager.register_remote(&engine, ChannelId(40), "remote", ChannelOptions::default());
        manager.register_remote(&engine, ChannelId(40), "remote", ChannelOptions::default());
        assert_eq!(manager.len(), 1);
        assert!(manager.get("remote").unwrap().remote);

        manager.on_open(ChannelId(40));
        assert!(manager.close(Some(&engine), "remote"));
        assert!(manager.is_empty());
        assert!(manager.active_channel().is_none());
        assert!(!manager.close(Some(&engine), "remote"));
    }

    #[tokio::test]
    async fn test_clear_closes_everything() {
        let engine = MockTransport::default();
        let (mut manager, ids) = manager_with(&engine, &["a", "b"]).await;
        manager.on_open(ids[0]);
        manager.clear(Some(&engine));
        assert!(manager.is_empty());
        assert!(manager.active_channel().is_none());
        assert_eq!(engine.closed_channels(), ids);
    }
}
