//! `rustrtc` implementation of the peer transport engine.
//!
//! rustrtc exposes pull-style subscriptions (`subscribe_ice_candidates`,
//! `subscribe_peer_state`, `recv`) rather than callbacks. Each
//! subscription gets a small pump task that converts what it reads into
//! [`EngineEvent`]s on the session queue. All pump tasks are aborted when
//! the transport is closed or dropped.
//!
//! rustrtc 0.3 does not report WebRTC stats objects, so [`get_stats`]
//! synthesises a report from byte counters kept by this adapter.
//!
//! [`get_stats`]: PeerTransport::get_stats

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ::rustrtc::transports::ice::IceCandidate;
use ::rustrtc::transports::sctp::DataChannel;
use ::rustrtc::{
    DataChannelEvent, IceServer, PeerConnection, PeerConnectionEvent, PeerConnectionState,
    RtcConfiguration, SdpType,
};
use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::{
    ChannelId, ChannelOptions, EngineError, EngineEvent, EngineSink, IceCandidateInit, Payload,
    PeerState, PeerTransport, SdpKind, SessionDescription, SignalingState, StatsEntry,
    StatsReport, TransportFactory,
};
use crate::config::IceServerConfig;

/// Advertised SCTP max message size. rustrtc omits the attribute and
/// browsers fall back to 64 KiB without it.
const MAX_MESSAGE_SIZE: u64 = 16 * 1024 * 1024;

/// Factory producing rustrtc peer connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcFactory;

impl TransportFactory for RtcFactory {
    fn create(
        &self,
        ice_servers: &[IceServerConfig],
        sink: EngineSink,
    ) -> Result<Box<dyn PeerTransport>, EngineError> {
        let config = RtcConfiguration {
            ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = PeerConnection::new(config);
        log::debug!("[Engine] Created peer connection (epoch {})", sink.epoch());
        Ok(Box::new(RtcTransport::start(pc, sink)))
    }
}

fn to_rtc_ice_server(server: &IceServerConfig) -> IceServer {
    IceServer {
        urls: server.urls.to_vec(),
        username: server.username.clone(),
        credential: server.credential.clone(),
        credential_type: ::rustrtc::IceCredentialType::Password,
    }
}

/// State shared between the transport handle and its pump tasks.
#[derive(Debug)]
struct Shared {
    channels: Mutex<HashMap<ChannelId, ChannelEntry>>,
    signaling: Mutex<SignalingState>,
    connected: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

#[derive(Debug)]
struct ChannelEntry {
    stream_id: u16,
    reader: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A rustrtc peer connection driven through [`PeerTransport`].
pub struct RtcTransport {
    pc: PeerConnection,
    sink: EngineSink,
    shared: Arc<Shared>,
    pumps: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for RtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcTransport")
            .field("sink", &self.sink)
            .field("shared", &self.shared)
            .field("pumps", &self.pumps)
            .finish_non_exhaustive()
    }
}

impl RtcTransport {
    fn start(pc: PeerConnection, sink: EngineSink) -> Self {
        let shared = Arc::new(Shared {
            channels: Mutex::new(HashMap::new()),
            signaling: Mutex::new(SignalingState::Stable),
            connected: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        });

        let pumps = vec![
            spawn_ice_pump(&pc, sink.clone()),
            spawn_state_pump(&pc, sink.clone(), Arc::clone(&shared)),
            spawn_event_pump(pc.clone(), sink.clone(), Arc::clone(&shared)),
        ];

        Self {
            pc,
            sink,
            shared,
            pumps,
        }
    }

    fn set_signaling(&self, state: SignalingState) {
        *lock(&self.shared.signaling) = state;
    }

    fn stream_id(&self, channel: ChannelId) -> Result<u16, EngineError> {
        lock(&self.shared.channels)
            .get(&channel)
            .map(|entry| entry.stream_id)
            .ok_or(EngineError::ChannelUnavailable(channel))
    }
}

impl Drop for RtcTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_ice_pump(pc: &PeerConnection, sink: EngineSink) -> JoinHandle<()> {
    let mut ice_rx = pc.subscribe_ice_candidates();
    tokio::spawn(async move {
        loop {
            match ice_rx.recv().await {
                Ok(candidate) => {
                    let init = IceCandidateInit {
                        candidate: format!("candidate:{}", candidate.to_sdp()),
                        sdp_mid: Some("0".to_string()),
                        sdp_m_line_index: Some(0),
                    };
                    if !sink.emit(EngineEvent::IceCandidate(init)) {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("[Engine] ICE candidate subscription lagged by {n}");
                }
            }
        }
    })
}

fn spawn_state_pump(pc: &PeerConnection, sink: EngineSink, shared: Arc<Shared>) -> JoinHandle<()> {
    let mut state_rx = pc.subscribe_peer_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = match *state_rx.borrow() {
                PeerConnectionState::Connected => PeerState::Connected,
                PeerConnectionState::Disconnected => PeerState::Disconnected,
                PeerConnectionState::Failed => PeerState::Failed,
                PeerConnectionState::Closed => PeerState::Closed,
                _ => PeerState::Connecting,
            };
            shared
                .connected
                .store(state == PeerState::Connected, Ordering::Relaxed);
            if !sink.emit(EngineEvent::ConnectionState(state)) || state == PeerState::Closed {
                break;
            }
        }
    })
}

fn spawn_event_pump(pc: PeerConnection, sink: EngineSink, shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match pc.recv().await {
                Some(PeerConnectionEvent::DataChannel(dc)) => {
                    let id = ChannelId(u32::from(dc.id));
                    if lock(&shared.channels).contains_key(&id) {
                        // Locally created channel echoed back by the stack
                        continue;
                    }
                    log::info!("[Engine] Remote data channel announced: {}", dc.label);
                    let label = dc.label.clone();
                    register_channel(&shared, id, dc, sink.clone());
                    sink.emit(EngineEvent::DataChannel {
                        id,
                        label,
                        options: ChannelOptions::default(),
                    });
                    // rustrtc surfaces remote channels once they are usable
                    sink.emit(EngineEvent::ChannelOpen(id));
                }
                Some(PeerConnectionEvent::Track(_)) => {
                    // Media tracks are not used
                }
                None => {
                    log::debug!("[Engine] Peer connection event stream ended");
                    break;
                }
            }
        }
    })
}

fn register_channel(shared: &Arc<Shared>, id: ChannelId, dc: Arc<DataChannel>, sink: EngineSink) {
    let stream_id = dc.id;
    let counters = Arc::clone(shared);
    let reader = tokio::spawn(async move {
        loop {
            match dc.recv().await {
                Some(DataChannelEvent::Message(data)) => {
                    counters
                        .bytes_received
                        .fetch_add(data.len() as u64, Ordering::Relaxed);
                    sink.emit(EngineEvent::ChannelMessage {
                        id,
                        payload: Payload::Binary(data.to_vec()),
                    });
                }
                Some(DataChannelEvent::Open) => {
                    sink.emit(EngineEvent::ChannelOpen(id));
                }
                Some(DataChannelEvent::Close) | None => {
                    sink.emit(EngineEvent::ChannelClose(id));
                    break;
                }
            }
        }
    });
    lock(&shared.channels).insert(id, ChannelEntry { stream_id, reader });
}

fn to_rtc_description(
    desc: &SessionDescription,
) -> Result<::rustrtc::SessionDescription, EngineError> {
    let kind = match desc.kind {
        SdpKind::Offer => SdpType::Offer,
        SdpKind::Answer => SdpType::Answer,
    };
    ::rustrtc::SessionDescription::parse(kind, &desc.sdp)
        .map_err(|e| EngineError::Rejected(format!("Invalid SDP: {e}")))
}

fn inject_max_message_size(sdp: &str, value: u64) -> String {
    if sdp.contains("max-message-size") {
        return sdp.to_string();
    }

    let mut result = String::with_capacity(sdp.len() + 30);
    let mut injected = false;
    for line in sdp.lines() {
        result.push_str(line);
        result.push_str("\r\n");
        if !injected && line.starts_with("m=application") {
            result.push_str(&format!("a=max-message-size:{value}\r\n"));
            injected = true;
        }
    }
    result
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer()
            .await
            .map_err(|e| EngineError::Failed(format!("Failed to create offer: {e}")))?;
        Ok(SessionDescription::offer(inject_max_message_size(
            &offer.to_sdp_string(),
            MAX_MESSAGE_SIZE,
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer()
            .await
            .map_err(|e| EngineError::Failed(format!("Failed to create answer: {e}")))?;
        Ok(SessionDescription::answer(inject_max_message_size(
            &answer.to_sdp_string(),
            MAX_MESSAGE_SIZE,
        )))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        let parsed = to_rtc_description(desc)?;
        self.pc
            .set_local_description(parsed)
            .map_err(|e| EngineError::Rejected(format!("Failed to set local description: {e}")))?;
        self.set_signaling(match desc.kind {
            SdpKind::Offer => SignalingState::HaveLocalOffer,
            SdpKind::Answer => SignalingState::Stable,
        });
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        let parsed = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(parsed)
            .await
            .map_err(|e| EngineError::Rejected(format!("Failed to set remote description: {e}")))?;
        self.set_signaling(match desc.kind {
            SdpKind::Offer => SignalingState::HaveRemoteOffer,
            SdpKind::Answer => SignalingState::Stable,
        });
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidateInit) -> Result<(), EngineError> {
        let sdp = candidate.candidate.trim_start_matches("candidate:");
        if sdp.is_empty() {
            // End-of-candidates marker
            return Ok(());
        }
        let parsed = IceCandidate::from_sdp(sdp)
            .map_err(|e| EngineError::Rejected(format!("Failed to parse ICE candidate: {e}")))?;
        self.pc
            .add_ice_candidate(parsed)
            .map_err(|e| EngineError::Rejected(format!("Failed to add ICE candidate: {e}")))
    }

    async fn get_stats(&self) -> Result<StatsReport, EngineError> {
        if *lock(&self.shared.signaling) == SignalingState::Closed {
            return Err(EngineError::Closed);
        }
        Ok(StatsReport {
            entries: vec![
                StatsEntry::Inbound {
                    bytes_received: self.shared.bytes_received.load(Ordering::Relaxed),
                },
                StatsEntry::Outbound {
                    bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
                },
                StatsEntry::CandidatePair {
                    succeeded: self.shared.connected.load(Ordering::Relaxed),
                    current_round_trip_time: None,
                },
            ],
        })
    }

    async fn create_data_channel(
        &self,
        label: &str,
        options: &ChannelOptions,
    ) -> Result<ChannelId, EngineError> {
        // rustrtc 0.3 negotiates reliable ordered channels only
        if !options.ordered || options.max_retransmits.is_some() {
            log::warn!(
                "[Engine] Channel '{label}': ordered/maxRetransmits options are not supported by rustrtc, using reliable ordered delivery"
            );
        }
        let dc = self
            .pc
            .create_data_channel(label, None)
            .map_err(|e| EngineError::Failed(format!("Failed to create data channel: {e}")))?;
        let id = ChannelId(u32::from(dc.id));
        register_channel(&self.shared, id, dc, self.sink.clone());
        Ok(id)
    }

    async fn send(&self, channel: ChannelId, payload: &Payload) -> Result<(), EngineError> {
        let stream_id = self.stream_id(channel)?;
        let bytes = payload.as_bytes();
        self.pc
            .send_data(stream_id, bytes)
            .await
            .map_err(|e| EngineError::Failed(format!("Send on {channel} failed: {e}")))?;
        self.shared
            .bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn close_channel(&self, channel: ChannelId) {
        // The SCTP stream itself is released with the peer connection
        if let Some(entry) = lock(&self.shared.channels).remove(&channel) {
            entry.reader.abort();
        }
    }

    fn signaling_state(&self) -> SignalingState {
        *lock(&self.shared.signaling)
    }

    fn close(&self) {
        {
            let mut signaling = lock(&self.shared.signaling);
            if *signaling == SignalingState::Closed {
                return;
            }
            *signaling = SignalingState::Closed;
        }
        for (_, entry) in lock(&self.shared.channels).drain() {
            entry.reader.abort();
        }
        for pump in &self.pumps {
            pump.abort();
        }
        self.pc.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_max_message_size_after_application_line() {
        let sdp = "v=0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\na=mid:0\r\n";
        let out = inject_max_message_size(sdp, 1024);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "m=application 9 UDP/DTLS/SCTP webrtc-datachannel");
        assert_eq!(lines[2], "a=max-message-size:1024");
        assert_eq!(lines[3], "a=mid:0");
    }

    #[test]
    fn test_inject_max_message_size_keeps_existing_attribute() {
        let sdp = "m=application 9 x\r\na=max-message-size:65536\r\n";
        assert_eq!(inject_max_message_size(sdp, 1024), sdp);
    }

    #[test]
    fn test_ice_server_conversion_flattens_urls() {
        let server = IceServerConfig {
            urls: crate::config::IceUrls::Many(vec!["stun:a".into(), "stun:b".into()]),
            username: Some("user".into()),
            credential: None,
        };
        let rtc = to_rtc_ice_server(&server);
        assert_eq!(rtc.urls, vec!["stun:a".to_string(), "stun:b".to_string()]);
        assert_eq!(rtc.username.as_deref(), Some("user"));
    }
}
