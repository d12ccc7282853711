//! In-memory engine and relay doubles for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::IceServerConfig;
use crate::engine::{
    ChannelId, ChannelOptions, EngineError, EngineSink, IceCandidateInit, Payload, PeerTransport,
    SdpKind, SessionDescription, SignalingState, StatsEntry, StatsReport, TransportFactory,
};
use crate::orchestrator::events::SessionEvent;
use crate::signaling::{Frame, SignalingConnector, SignalingMessage, SignalingTransport};

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    CreateChannel(String),
    Send(ChannelId, Payload),
    CloseChannel(ChannelId),
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Mutex<Vec<Call>>,
    signaling: Mutex<Option<SignalingState>>,
    next_id: AtomicU32,
    /// Candidate line → remaining failures.
    failing_candidates: Mutex<HashMap<String, u32>>,
    fail_remote: AtomicBool,
    fail_answer: AtomicBool,
    fail_stats: AtomicBool,
    /// Number of sends to accept before rejecting; `u32::MAX` = unlimited.
    send_budget: AtomicU32,
    sink: Mutex<Option<EngineSink>>,
}

/// Recording `PeerTransport`. Clones share state.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let state = MockState::default();
        state.next_id.store(1, Ordering::SeqCst);
        state.send_budget.store(u32::MAX, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }
}

impl MockTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().unwrap().clear();
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddCandidate(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<(ChannelId, Payload)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(id, payload) => Some((id, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn closed_channels(&self) -> Vec<ChannelId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CloseChannel(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.calls().contains(&Call::Close)
    }

    /// Fail `candidate` the next `times` attempts.
    pub fn fail_candidate(&self, candidate: &str, times: u32) {
        self.state
            .failing_candidates
            .lock()
            .unwrap()
            .insert(candidate.to_string(), times);
    }

    pub fn fail_remote_description(&self, fail: bool) {
        self.state.fail_remote.store(fail, Ordering::SeqCst);
    }

    pub fn fail_answer(&self, fail: bool) {
        self.state.fail_answer.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stats(&self, fail: bool) {
        self.state.fail_stats.store(fail, Ordering::SeqCst);
    }

    /// Accept `n` more sends, then reject every further send.
    pub fn accept_sends(&self, n: u32) {
        self.state.send_budget.store(n, Ordering::SeqCst);
    }

    pub fn set_signaling_state(&self, state: SignalingState) {
        *self.state.signaling.lock().unwrap() = Some(state);
    }

    pub fn sink(&self) -> Option<EngineSink> {
        self.state.sink.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.state.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.record(Call::CreateOffer);
        Ok(SessionDescription::offer("mock-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.record(Call::CreateAnswer);
        if self.state.fail_answer.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("answer refused".to_string()));
        }
        Ok(SessionDescription::answer("mock-answer"))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        self.record(Call::SetLocal(desc.kind));
        self.set_signaling_state(match desc.kind {
            SdpKind::Offer => SignalingState::HaveLocalOffer,
            SdpKind::Answer => SignalingState::Stable,
        });
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        self.record(Call::SetRemote(desc.kind));
        if self.state.fail_remote.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("bad sdp".to_string()));
        }
        self.set_signaling_state(match desc.kind {
            SdpKind::Offer => SignalingState::HaveRemoteOffer,
            SdpKind::Answer => SignalingState::Stable,
        });
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidateInit) -> Result<(), EngineError> {
        let mut failing = self.state.failing_candidates.lock().unwrap();
        if let Some(remaining) = failing.get_mut(&candidate.candidate) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EngineError::Rejected("unreachable candidate".to_string()));
            }
        }
        drop(failing);
        self.record(Call::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn get_stats(&self) -> Result<StatsReport, EngineError> {
        if self.state.fail_stats.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("stats unavailable".to_string()));
        }
        Ok(StatsReport {
            entries: vec![
                StatsEntry::Inbound { bytes_received: 100 },
                StatsEntry::Outbound { bytes_sent: 200 },
                StatsEntry::CandidatePair {
                    succeeded: true,
                    current_round_trip_time: Some(0.012),
                },
            ],
        })
    }

    async fn create_data_channel(
        &self,
        label: &str,
        _options: &ChannelOptions,
    ) -> Result<ChannelId, EngineError> {
        self.record(Call::CreateChannel(label.to_string()));
        Ok(ChannelId(self.state.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn send(&self, channel: ChannelId, payload: &Payload) -> Result<(), EngineError> {
        let budget = self.state.send_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(EngineError::ChannelUnavailable(channel));
        }
        if budget != u32::MAX {
            self.state.send_budget.store(budget - 1, Ordering::SeqCst);
        }
        self.record(Call::Send(channel, payload.clone()));
        Ok(())
    }

    fn close_channel(&self, channel: ChannelId) {
        self.record(Call::CloseChannel(channel));
    }

    fn signaling_state(&self) -> SignalingState {
        self.state
            .signaling
            .lock()
            .unwrap()
            .unwrap_or(SignalingState::Stable)
    }

    fn close(&self) {
        self.record(Call::Close);
    }
}

/// Factory handing out [`MockTransport`]s and remembering each one.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    created: Arc<Mutex<Vec<MockTransport>>>,
}

impl MockFactory {
    pub fn created(&self) -> Vec<MockTransport> {
        self.created.lock().unwrap().clone()
    }

    pub fn latest(&self) -> MockTransport {
        self.created().last().cloned().expect("no engine created")
    }
}

impl TransportFactory for MockFactory {
    fn create(
        &self,
        _ice_servers: &[IceServerConfig],
        sink: EngineSink,
    ) -> Result<Box<dyn PeerTransport>, EngineError> {
        let transport = MockTransport::default();
        *transport.state.sink.lock().unwrap() = Some(sink);
        self.created.lock().unwrap().push(transport.clone());
        Ok(Box::new(transport))
    }
}

/// Relay double recording every outbound frame.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    sent: Arc<Mutex<Vec<Frame>>>,
    connects: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    events: Arc<Mutex<Option<(u64, mpsc::UnboundedSender<SessionEvent>)>>>,
}

impl FakeConnector {
    pub fn frames(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<SignalingMessage> {
        self.frames()
            .iter()
            .map(|f| f.decode().expect("undecodable frame"))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Epoch of the latest connection.
    pub fn epoch(&self) -> Option<u64> {
        self.events.lock().unwrap().as_ref().map(|(epoch, _)| *epoch)
    }
}

#[derive(Debug)]
struct FakeTransport {
    sent: Arc<Mutex<Vec<Frame>>>,
}

#[async_trait]
impl SignalingTransport for FakeTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn connect(
        &self,
        _url: &str,
        epoch: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SignalingTransport>> {
        if self.refuse.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some((epoch, events));
        Ok(Box::new(FakeTransport {
            sent: Arc::clone(&self.sent),
        }))
    }
}
