//! Connection orchestration.
//!
//! [`ConnectionOrchestrator`] owns everything that makes up a debugging
//! session: the relay connection, the engine instance, the candidate
//! buffer, the channel manager, the outbound queue, file transfers and the
//! stats sampler. It is driven exclusively by [`SessionEvent`]s consumed one
//! at a time from a single queue; see [`events`].
//!
//! # Session lifecycle
//!
//! ```text
//! New ──connect──▶ Negotiating ──peer connected──▶ Connected
//!                     │  (offerer: channel, offer)       │
//!                     │  (answerer: on remote offer)     │
//!                     └────────────── teardown ──────────┴──▶ Closed
//! ```
//!
//! Negotiation failures are logged and leave the state where it was; only
//! teardown moves a session to `Closed`.
//!
//! # Stale events
//!
//! Relay connections and engine instances each carry an epoch. An event
//! whose epoch does not match the live connection or engine is dropped, so
//! work completing after a teardown or an engine replacement has no effect.

// Rust guideline compliant 2026-02

pub mod events;
pub mod ice_buffer;

mod delivery;
mod negotiation;
mod transfer;


use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channels::{DataChannelManager, MessageQueue};
use crate::commands::{self, Command};
use crate::config::Config;
use crate::constants::{MANUAL_RECONNECT_DELAY, RECONNECT_DELAY};
use crate::engine::{PeerState, PeerTransport, TransportFactory};
use crate::error::SessionError;
use crate::inspect::{InspectionSink, MessageLog};
use crate::signaling::{SignalingChannel, SignalingConnector};
use crate::stats::{format_bytes, StatsSampler, TrafficCounters};
use crate::transfer::FileTransferEngine;

pub use delivery::Delivery;
pub use events::SessionEvent;
pub use ice_buffer::{FlushReport, IceCandidateBuffer};

/// Which side of the offer/answer exchange this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Not decided yet.
    Unknown,
    /// Sent the offer.
    Offerer,
    /// Answered a remote offer.
    Answerer,
}

/// Negotiation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Session created, nothing sent.
    New,
    /// Offer/answer in progress.
    Negotiating,
    /// Peer transport connected.
    Connected,
    /// Torn down.
    Closed,
}

/// State of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Epoch of the relay connection this session rides on.
    pub epoch: u64,
    /// Offerer or answerer.
    pub role: Role,
    /// Negotiation progress.
    pub state: NegotiationState,
    /// Whether a remote description has been applied to the current engine.
    pub remote_description_set: bool,
    /// Label of the active channel.
    pub active_channel: Option<String>,
}

impl Session {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            role: Role::Unknown,
            state: NegotiationState::New,
            remote_description_set: false,
            active_channel: None,
        }
    }

    fn is_live(&self) -> bool {
        self.state != NegotiationState::Closed
    }
}

/// The current engine instance and what it last reported.
#[derive(Debug)]
struct EngineSlot {
    epoch: u64,
    transport: Box<dyn PeerTransport>,
    peer_state: PeerState,
}

/// Drives one debugging session at a time.
#[derive(Debug)]
pub struct ConnectionOrchestrator {
    config: Config,
    factory: Arc<dyn TransportFactory>,
    events: mpsc::UnboundedSender<SessionEvent>,
    signaling: SignalingChannel,
    session: Option<Session>,
    engine: Option<EngineSlot>,
    ice: IceCandidateBuffer,
    channels: DataChannelManager,
    queue: MessageQueue,
    transfers: FileTransferEngine,
    stats: StatsSampler,
    counters: TrafficCounters,
    inspector: Box<dyn InspectionSink>,
    reconnect_timer: Option<JoinHandle<()>>,
    next_epoch: u64,
}

impl ConnectionOrchestrator {
    /// Create an idle orchestrator posting background events to `events`.
    pub fn new(
        config: Config,
        factory: Arc<dyn TransportFactory>,
        connector: Arc<dyn SignalingConnector>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let signaling = SignalingChannel::new(connector, config.signaling.protocol);
        let transfers = FileTransferEngine::new(config.download_dir.clone());
        Self {
            config,
            factory,
            events,
            signaling,
            session: None,
            engine: None,
            ice: IceCandidateBuffer::default(),
            channels: DataChannelManager::new(),
            queue: MessageQueue::new(),
            transfers,
            stats: StatsSampler::default(),
            counters: TrafficCounters::default(),
            inspector: Box::new(MessageLog::default()),
            reconnect_timer: None,
            next_epoch: 0,
        }
    }

    /// Replace the inspection sink.
    pub fn with_inspector(mut self, inspector: Box<dyn InspectionSink>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Consume events until `Quit`/`Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        self.teardown();
        log::info!("[Session] Event loop stopped");
    }

    /// Handle one event. Returns `false` when the loop should stop.
    pub async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Command(command) => return self.handle_command(command).await,
            SessionEvent::Signaling { epoch, frame } => {
                if self.is_current_signaling(epoch) {
                    self.handle_signaling_frame(&frame).await;
                }
            }
            SessionEvent::SignalingClosed { epoch } => {
                if self.is_current_signaling(epoch) {
                    self.on_signaling_closed();
                }
            }
            SessionEvent::Engine { epoch, event } => {
                if self.engine.as_ref().is_some_and(|e| e.epoch == epoch) {
                    self.handle_engine_event(event).await;
                } else {
                    log::debug!("[Session] Dropping event from stale engine {epoch}: {event:?}");
                }
            }
            SessionEvent::StatsTick { epoch } => {
                if self.is_current_session(epoch) {
                    self.poll_stats().await;
                }
            }
            SessionEvent::TransferStep { epoch, id } => {
                if self.is_current_session(epoch) {
                    self.transfer_step(id).await;
                }
            }
            SessionEvent::ReconnectDue => {
                self.reconnect_timer = None;
                // Failure is already logged
                let _ = self.connect().await;
            }
            SessionEvent::Shutdown => return false,
        }
        true
    }

    fn is_current_signaling(&self, epoch: u64) -> bool {
        self.signaling.is_open() && self.signaling.epoch() == epoch
    }

    fn is_current_session(&self, epoch: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.is_live() && s.epoch == epoch)
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    /// Open the relay connection and start negotiating as offerer.
    ///
    /// A live session is left alone.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.session.as_ref().is_some_and(Session::is_live) {
            log::warn!("[Session] Already connected");
            return Ok(());
        }
        self.cancel_reconnect();

        let epoch = self.bump_epoch();
        let url = self.config.signaling.url.clone();
        if let Err(e) = self.signaling.connect(&url, epoch, self.events.clone()).await {
            log::error!("[Signaling] {e}");
            if self.config.auto_reconnect {
                self.schedule_reconnect(RECONNECT_DELAY);
            }
            return Err(e);
        }

        self.session = Some(Session::new(epoch));
        self.stats.start(epoch, self.events.clone());
        self.begin_offer().await;
        Ok(())
    }

    /// Close the relay connection, every channel and the engine.
    ///
    /// Queued outbound messages are kept for the next session.
    pub fn teardown(&mut self) {
        self.signaling.close();
        self.discard_engine();
        self.ice.clear();
        self.stats.stop();
        self.transfers.abort_all();
        self.transfers.inbound().reset();
        if let Some(session) = self.session.as_mut() {
            if session.is_live() {
                log::info!("[Session] Closed");
            }
            session.state = NegotiationState::Closed;
        }
    }

    fn on_signaling_closed(&mut self) {
        log::info!("[Signaling] Relay connection lost");
        if self.config.auto_reconnect {
            log::info!(
                "[Signaling] Reconnecting in {} ms",
                RECONNECT_DELAY.as_millis()
            );
            self.schedule_reconnect(RECONNECT_DELAY);
        }
        self.teardown();
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.cancel_reconnect();
        let events = self.events.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::ReconnectDue);
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send(text) => {
                self.report_delivery(crate::engine::Payload::Text(text)).await;
            }
            Command::Template(payload) => self.report_delivery(payload).await,
            Command::SendFile(path) => {
                let _ = self.send_file(&path).await;
            }
            Command::Help => println!("{}", commands::HELP),
            Command::Stats => println!("{}", self.status_report()),
            Command::Connect => {
                let _ = self.connect().await;
            }
            Command::Disconnect => {
                self.cancel_reconnect();
                self.teardown();
            }
            Command::Reconnect => {
                log::info!("[Session] Reconnecting");
                self.teardown();
                self.schedule_reconnect(MANUAL_RECONNECT_DELAY);
            }
            Command::CreateChannel { label, options } => {
                let _ = self.create_channel(&label, options).await;
            }
            Command::CloseChannel(label) => self.close_channel(&label).await,
            Command::Debug(value) => {
                let enabled = value.unwrap_or(!self.config.debug_mode);
                self.set_debug(enabled);
            }
            Command::Quit => {
                self.cancel_reconnect();
                return false;
            }
        }
        true
    }

    async fn report_delivery(&mut self, payload: crate::engine::Payload) {
        match self.send(payload).await {
            Delivery::Delivered => {}
            Delivery::Queued if self.transfer_in_progress() => log::info!(
                "[Queue] Transfer in progress, message queued ({} waiting)",
                self.queue.len()
            ),
            Delivery::Queued => log::info!(
                "[Queue] No open channel, message queued ({} waiting)",
                self.queue.len()
            ),
            Delivery::Dropped => log::warn!("[Queue] Message dropped"),
        }
    }

    /// Create a channel on a connected peer.
    pub async fn create_channel(
        &mut self,
        label: &str,
        options: crate::engine::ChannelOptions,
    ) -> Result<(), SessionError> {
        let Some(engine) = self.engine.as_ref() else {
            log::error!("[DataChannel] Cannot create '{label}': no peer connection");
            return Err(SessionError::NoSession);
        };
        if engine.peer_state != PeerState::Connected {
            log::error!("[DataChannel] Cannot create '{label}': peer is {}", engine.peer_state);
            return Err(SessionError::NotConnected);
        }
        self.channels
            .create(Some(engine.transport.as_ref()), label, options)
            .await?;
        self.sync_active();
        Ok(())
    }

    async fn close_channel(&mut self, label: &str) {
        let engine = self.engine.as_ref().map(|e| e.transport.as_ref());
        if self.channels.close(engine, label) {
            self.sync_active();
            self.drain().await;
        }
    }

    /// Enable or disable verbose logging.
    pub fn set_debug(&mut self, enabled: bool) {
        self.config.debug_mode = enabled;
        log::set_max_level(if enabled {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
        log::info!("[Session] Debug mode {}", if enabled { "on" } else { "off" });
    }

    async fn poll_stats(&mut self) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        let result = engine.transport.get_stats().await;
        self.stats.record(result, self.config.debug_mode);
    }

    pub(crate) fn sync_active(&mut self) {
        let label = self.channels.active_channel().map(|c| c.label.clone());
        if let Some(session) = self.session.as_mut() {
            session.active_channel = label;
        }
    }

    /// Multi-line summary printed by `/stats`.
    pub fn status_report(&self) -> String {
        let mut out = String::new();
        let signaling = if self.signaling.is_open() { "open" } else { "closed" };
        let peer = self
            .engine
            .as_ref()
            .map_or_else(|| "none".to_string(), |e| e.peer_state.to_string());
        let (role, state) = self
            .session
            .as_ref()
            .map_or((Role::Unknown, NegotiationState::New), |s| (s.role, s.state));
        let active = self
            .channels
            .active_channel()
            .map_or_else(|| "none".to_string(), |c| format!("{} ({})", c.label, c.ready_state));
        let rtt = self
            .stats
            .history()
            .latest()
            .and_then(|s| s.rtt_millis)
            .map_or_else(|| "n/a".to_string(), |ms| format!("{ms} ms"));

        let _ = writeln!(out, "Signaling:       {signaling} ({})", self.signaling.protocol());
        let _ = writeln!(out, "Peer:            {peer}");
        let _ = writeln!(out, "Session:         {state:?} as {role:?}");
        let _ = writeln!(out, "Active channel:  {active}");
        let _ = writeln!(out, "Channels:        {}", self.channels.len());
        let _ = writeln!(
            out,
            "Sent:            {} in {} messages",
            format_bytes(self.counters.bytes_sent),
            self.counters.messages_sent
        );
        let _ = writeln!(
            out,
            "Received:        {} in {} messages",
            format_bytes(self.counters.bytes_received),
            self.counters.messages_received
        );
        let _ = writeln!(out, "RTT:             {rtt}");
        let _ = writeln!(out, "ICE buffered:    {}", self.ice.len());
        let _ = writeln!(out, "Queue:           {}", self.queue.len());
        let _ = write!(out, "Transfers:       {} done, {} active", self.transfers.transferred().len(), self.transfers.pending_count());
        out
    }

    /// Current session, if one was created.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Channel bookkeeping.
    pub fn channels(&self) -> &DataChannelManager {
        &self.channels
    }

    /// Outbound backlog.
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Candidate buffer.
    pub fn ice_buffer(&self) -> &IceCandidateBuffer {
        &self.ice
    }

    /// Stats sampler and history.
    pub fn stats(&self) -> &StatsSampler {
        &self.stats
    }

    /// Traffic counters.
    pub fn counters(&self) -> TrafficCounters {
        self.counters
    }

    /// File transfers.
    pub fn transfers(&self) -> &FileTransferEngine {
        &self.transfers
    }

    /// Epoch of the live engine.
    pub fn engine_epoch(&self) -> Option<u64> {
        self.engine.as_ref().map(|e| e.epoch)
    }

    /// Last state reported by the live engine.
    pub fn peer_state(&self) -> Option<PeerState> {
        self.engine.as_ref().map(|e| e.peer_state)
    }
}
