//! Signaling channel to the relay.
//!
//! [`SignalingChannel`] owns the socket to the relay for one connection
//! attempt. Inbound frames are not returned from a `recv` call; a reader
//! task spawned by the [`SignalingConnector`] pushes them into the session
//! event queue tagged with the connection epoch, followed by a single
//! [`SessionEvent::SignalingClosed`] when the socket ends.
//!
//! Outbound messages are encoded as text frames in [`ProtocolMode::Json`]
//! and as the UTF-8 bytes of the same JSON in [`ProtocolMode::Binary`].
//! Inbound decoding accepts either frame type regardless of mode.

// Rust guideline compliant 2026-02

pub mod message;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use message::{DecodeError, FileInfo, SignalingMessage};

use crate::error::SessionError;
use crate::orchestrator::events::SessionEvent;
use crate::ws::{self, WsMessage, WsWriter};

/// Frame encoding for outbound signaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    /// JSON text frames.
    #[default]
    Json,
    /// JSON carried in binary frames.
    Binary,
}

impl FromStr for ProtocolMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown protocol mode '{other}' (expected json or binary)")),
        }
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Binary => "binary",
        })
    }
}

/// A raw signaling frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Encode a message for the given mode.
    pub fn encode(message: &SignalingMessage, mode: ProtocolMode) -> Self {
        let text = message.encode();
        match mode {
            ProtocolMode::Json => Self::Text(text),
            ProtocolMode::Binary => Self::Binary(text.into_bytes()),
        }
    }

    /// Decode the frame into a message.
    pub fn decode(&self) -> Result<SignalingMessage, DecodeError> {
        match self {
            Self::Text(text) => SignalingMessage::decode(text),
            Self::Binary(bytes) => SignalingMessage::decode_bytes(bytes),
        }
    }

    /// Frame size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// True for an empty frame.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write side of an open signaling connection.
#[async_trait]
pub trait SignalingTransport: Send + fmt::Debug {
    /// Send one frame.
    async fn send(&mut self, frame: Frame) -> Result<()>;
}

/// Opens signaling connections.
#[async_trait]
pub trait SignalingConnector: Send + Sync + fmt::Debug {
    /// Connect to `url`. Inbound frames for this connection are delivered as
    /// `SessionEvent::Signaling { epoch, .. }` on `events`.
    async fn connect(
        &self,
        url: &str,
        epoch: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SignalingTransport>>;
}

/// WebSocket connector used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

/// WebSocket signaling transport.
#[derive(Debug)]
struct WsTransport {
    writer: WsWriter,
    reader: JoinHandle<()>,
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl SignalingTransport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Text(text) => self.writer.send_text(&text).await,
            Frame::Binary(bytes) => self.writer.send_binary(bytes).await,
        }
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(
        &self,
        url: &str,
        epoch: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SignalingTransport>> {
        let (writer, mut reader) = ws::connect(url).await?;

        let reader = tokio::spawn(async move {
            loop {
                let frame = match reader.recv().await {
                    Some(Ok(WsMessage::Text(text))) => Frame::Text(text),
                    Some(Ok(WsMessage::Binary(bytes))) => Frame::Binary(bytes),
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("[Signaling] Relay closed connection ({code}) {reason}");
                        break;
                    }
                    Some(Err(e)) => {
                        log::warn!("[Signaling] {e}");
                        break;
                    }
                    None => break,
                };
                if events.send(SessionEvent::Signaling { epoch, frame }).is_err() {
                    return;
                }
            }
            let _ = events.send(SessionEvent::SignalingClosed { epoch });
        });

        Ok(Box::new(WsTransport { writer, reader }))
    }
}

/// The session's connection to the relay.
#[derive(Debug)]
pub struct SignalingChannel {
    connector: Arc<dyn SignalingConnector>,
    transport: Option<Box<dyn SignalingTransport>>,
    protocol: ProtocolMode,
    epoch: u64,
}

impl SignalingChannel {
    /// Create a closed channel.
    pub fn new(connector: Arc<dyn SignalingConnector>, protocol: ProtocolMode) -> Self {
        Self {
            connector,
            transport: None,
            protocol,
            epoch: 0,
        }
    }

    /// Open a connection to `url`, replacing any previous one.
    pub async fn connect(
        &mut self,
        url: &str,
        epoch: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), SessionError> {
        self.close();
        let transport = self
            .connector
            .connect(url, epoch, events)
            .await
            .map_err(|e| SessionError::Transport(format!("{e:#}")))?;
        self.transport = Some(transport);
        self.epoch = epoch;
        log::info!("[Signaling] Connected to {url}");
        Ok(())
    }

    /// True while a connection is held.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Epoch of the current (or last) connection.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Outbound frame encoding.
    pub fn protocol(&self) -> ProtocolMode {
        self.protocol
    }

    /// Send a message. Returns the number of bytes written.
    ///
    /// Failures are logged here; callers only learn that nothing was sent.
    pub async fn send(&mut self, message: &SignalingMessage) -> Result<usize, SessionError> {
        let Some(transport) = self.transport.as_mut() else {
            log::warn!(
                "[Signaling] Cannot send '{}': not connected to relay",
                message.kind()
            );
            return Err(SessionError::Transport("not connected".to_string()));
        };

        let frame = Frame::encode(message, self.protocol);
        let size = frame.len();
        match transport.send(frame).await {
            Ok(()) => {
                log::debug!("[Signaling] Sent '{}' ({size} bytes)", message.kind());
                Ok(size)
            }
            Err(e) => {
                log::error!("[Signaling] Failed to send '{}': {e:#}", message.kind());
                Err(SessionError::Transport(format!("{e:#}")))
            }
        }
    }

    /// Drop the connection. The reader task stops with it.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            log::info!("[Signaling] Connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_mode_parse() {
        assert_eq!("JSON".parse::<ProtocolMode>(), Ok(ProtocolMode::Json));
        assert_eq!("binary".parse::<ProtocolMode>(), Ok(ProtocolMode::Binary));
        assert!("xml".parse::<ProtocolMode>().is_err());
    }

    #[test]
    fn test_binary_mode_carries_same_json() {
        let msg = SignalingMessage::FileComplete { id: 9 };
        let text = Frame::encode(&msg, ProtocolMode::Json);
        let binary = Frame::encode(&msg, ProtocolMode::Binary);
        match (&text, &binary) {
            (Frame::Text(t), Frame::Binary(b)) => assert_eq!(t.as_bytes(), b.as_slice()),
            other => panic!("unexpected frames {other:?}"),
        }
        assert_eq!(binary.decode().unwrap(), msg);
        assert_eq!(text.len(), binary.len());
    }

    #[tokio::test]
    async fn test_send_without_connection_is_transport_error() {
        let mut channel = SignalingChannel::new(Arc::new(WsConnector), ProtocolMode::Json);
        let err = channel
            .send(&SignalingMessage::FileComplete { id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_channel_closed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut channel = SignalingChannel::new(Arc::new(WsConnector), ProtocolMode::Json);
        assert!(channel.connect("ws://127.0.0.1:1/", 1, tx).await.is_err());
        assert!(!channel.is_open());
    }
}
