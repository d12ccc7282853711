//! Peer transport engine contract.
//!
//! The orchestrator never talks to a WebRTC stack directly. It drives a
//! [`PeerTransport`] obtained from a [`TransportFactory`], and the engine
//! reports asynchronous happenings (trickled candidates, state changes,
//! channel lifecycle, inbound messages) as [`EngineEvent`]s pushed into
//! the session event queue through an [`EngineSink`].
//!
//! # Architecture
//!
//! ```text
//! ConnectionOrchestrator
//!     │  async calls
//!     ▼
//! PeerTransport (trait) ──── RtcTransport (rustrtc)
//!     │  EngineSink::emit
//!     ▼
//! SessionEvent::Engine { epoch, event }
//! ```
//!
//! Every sink is stamped with the epoch of the engine instance it belongs
//! to, so events from a replaced or torn-down engine can be recognised and
//! dropped by the consumer.

pub mod rtc;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::IceServerConfig;
use crate::orchestrator::events::SessionEvent;

/// Engine-assigned data channel identifier.
///
/// Distinct from the user-chosen label: two channels created with the same
/// label always have different ids within one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Data channel creation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Whether delivery is ordered.
    pub ordered: bool,
    /// Retransmit limit; `None` means fully reliable.
    pub max_retransmits: Option<u16>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            max_retransmits: None,
        }
    }
}

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer.
    Offer,
    /// Answer.
    Answer,
}

/// A full session description, as carried in `offer`/`answer` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate descriptor in browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    /// `candidate:...` attribute line.
    pub candidate: String,
    /// Media stream id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

/// Offer/answer state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// No negotiation in progress.
    Stable,
    /// A local offer was applied, waiting for an answer.
    HaveLocalOffer,
    /// A remote offer was applied, answer not yet applied locally.
    HaveRemoteOffer,
    /// Engine closed.
    Closed,
}

/// Aggregate peer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Created, nothing happened yet.
    New,
    /// ICE/DTLS in progress.
    Connecting,
    /// Transport established.
    Connected,
    /// Connectivity lost, may recover.
    Disconnected,
    /// Connectivity failed.
    Failed,
    /// Closed.
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Data channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
}

impl Payload {
    /// Size in bytes on the wire.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// True for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }
}

/// One entry of a metrics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEntry {
    /// Receiving transport leg.
    Inbound {
        /// Cumulative bytes received.
        bytes_received: u64,
    },
    /// Sending transport leg.
    Outbound {
        /// Cumulative bytes sent.
        bytes_sent: u64,
    },
    /// ICE candidate pair.
    CandidatePair {
        /// Whether the pair reached the `succeeded` state.
        succeeded: bool,
        /// Current round-trip time in seconds.
        current_round_trip_time: Option<f64>,
    },
}

/// Metrics snapshot returned by [`PeerTransport::get_stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    /// Entries in engine order.
    pub entries: Vec<StatsEntry>,
}

/// Event reported by an engine instance.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A local candidate was gathered and should be trickled to the peer.
    IceCandidate(IceCandidateInit),
    /// Aggregate connection state changed.
    ConnectionState(PeerState),
    /// The remote peer announced a channel.
    DataChannel {
        /// Engine id of the new channel.
        id: ChannelId,
        /// Label chosen by the remote peer.
        label: String,
        /// Delivery options, as far as the engine knows them.
        options: ChannelOptions,
    },
    /// A channel became open.
    ChannelOpen(ChannelId),
    /// A channel closed.
    ChannelClose(ChannelId),
    /// A channel reported an error.
    ChannelError {
        /// Channel id.
        id: ChannelId,
        /// Engine-provided description.
        message: String,
    },
    /// A message arrived on a channel.
    ChannelMessage {
        /// Channel id.
        id: ChannelId,
        /// Message payload.
        payload: Payload,
    },
}

/// Errors from the peer transport engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine rejected a description, candidate or option.
    Rejected(String),
    /// An operation failed inside the engine.
    Failed(String),
    /// The referenced channel does not exist or is not open.
    ChannelUnavailable(ChannelId),
    /// The engine instance was closed.
    Closed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "Rejected: {msg}"),
            Self::Failed(msg) => write!(f, "Engine failure: {msg}"),
            Self::ChannelUnavailable(id) => write!(f, "Channel {id} unavailable"),
            Self::Closed => write!(f, "Engine closed"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Epoch-stamped handle an engine uses to report events.
#[derive(Debug, Clone)]
pub struct EngineSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EngineSink {
    /// Create a sink for the engine instance of `epoch`.
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { epoch, tx }
    }

    /// Epoch of the engine instance this sink belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Push an event. Returns `false` once the session loop is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx
            .send(SessionEvent::Engine {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// A live peer connection.
///
/// All methods take `&self`; implementations use interior state so a call
/// that suspends never holds a borrow of the orchestrator.
#[async_trait]
pub trait PeerTransport: Send + Sync + fmt::Debug {
    /// Generate an offer.
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    /// Generate an answer to the applied remote offer.
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    /// Apply a locally generated description.
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError>;

    /// Apply the remote peer's description.
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), EngineError>;

    /// Apply a remote candidate.
    async fn add_ice_candidate(&self, candidate: &IceCandidateInit) -> Result<(), EngineError>;

    /// Take a metrics snapshot.
    async fn get_stats(&self) -> Result<StatsReport, EngineError>;

    /// Create a local data channel.
    async fn create_data_channel(
        &self,
        label: &str,
        options: &ChannelOptions,
    ) -> Result<ChannelId, EngineError>;

    /// Send one message on a channel.
    async fn send(&self, channel: ChannelId, payload: &Payload) -> Result<(), EngineError>;

    /// Close one channel. Idempotent.
    fn close_channel(&self, channel: ChannelId);

    /// Current offer/answer state.
    fn signaling_state(&self) -> SignalingState;

    /// Close the connection and every channel. Idempotent.
    fn close(&self);
}

/// Creates engine instances.
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Create a peer connection reporting to `sink`.
    fn create(
        &self,
        ice_servers: &[IceServerConfig],
        sink: EngineSink,
    ) -> Result<Box<dyn PeerTransport>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_shape() {
        let json = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn test_candidate_init_matches_browser_keys() {
        let parsed: IceCandidateInit = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(parsed.sdp_mid.as_deref(), Some("0"));
        assert_eq!(parsed.sdp_m_line_index, Some(0));
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(Payload::Text("héllo".to_string()).len(), 6);
        assert_eq!(Payload::Binary(vec![0; 848]).len(), 848);
        assert!(Payload::Binary(Vec::new()).is_empty());
    }

    #[test]
    fn test_sink_stamps_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EngineSink::new(7, tx);
        assert!(sink.emit(EngineEvent::ChannelOpen(ChannelId(1))));
        match rx.try_recv().unwrap() {
            SessionEvent::Engine { epoch, event } => {
                assert_eq!(epoch, 7);
                assert_eq!(event, EngineEvent::ChannelOpen(ChannelId(1)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
