//! Offer/answer exchange, engine replacement and candidate handling.

use crate::constants::PREVIEW_LEN;
use crate::engine::{
    EngineSink, IceCandidateInit, PeerState, PeerTransport, SessionDescription, SignalingState,
};
use crate::error::SessionError;
use crate::inspect::{truncate_text, Direction, InspectionRecord, Route};
use crate::signaling::{Frame, SignalingMessage};

use super::{ConnectionOrchestrator, EngineSlot, NegotiationState, Role};

impl ConnectionOrchestrator {
    fn transport(&self) -> Result<&dyn PeerTransport, SessionError> {
        self.engine
            .as_ref()
            .map(|e| e.transport.as_ref())
            .ok_or(SessionError::NoSession)
    }

    /// Close the current engine and every channel on it.
    ///
    /// Buffered candidates survive: they belong to the remote peer, not to
    /// the engine being dropped.
    pub(super) fn discard_engine(&mut self) {
        self.channels
            .clear(self.engine.as_ref().map(|e| e.transport.as_ref()));
        if let Some(engine) = self.engine.take() {
            log::debug!("[Negotiation] Closing engine {}", engine.epoch);
            engine.transport.close();
        }
        if let Some(session) = self.session.as_mut() {
            session.remote_description_set = false;
            session.active_channel = None;
        }
    }

    /// Replace the engine with a fresh instance under a new epoch.
    pub(super) fn create_engine(&mut self) -> Result<(), SessionError> {
        self.discard_engine();
        let epoch = self.bump_epoch();
        let sink = EngineSink::new(epoch, self.events.clone());
        let transport = self
            .factory
            .create(&self.config.ice_servers, sink)
            .map_err(|e| {
                log::error!("[Negotiation] Failed to create peer connection: {e}");
                SessionError::negotiation(&e)
            })?;
        log::info!("[Negotiation] Peer connection created (engine {epoch})");
        self.engine = Some(EngineSlot {
            epoch,
            transport,
            peer_state: PeerState::New,
        });
        Ok(())
    }

    /// Send on the relay, counting and inspecting what went out.
    pub(super) async fn send_signaling(
        &mut self,
        message: &SignalingMessage,
    ) -> Result<(), SessionError> {
        let size = self.signaling.send(message).await?;
        self.counters.sent(size);
        self.inspector.record(InspectionRecord::new(
            Direction::Outgoing,
            Route::Signaling,
            message.encode().as_bytes(),
        ));
        Ok(())
    }

    /// Start negotiating as offerer.
    ///
    /// The default channel is created before the offer so the offer carries
    /// its data section and no renegotiation is needed.
    pub(super) async fn begin_offer(&mut self) {
        if let Err(e) = self.try_begin_offer().await {
            log::error!("[Negotiation] Offer failed: {e}");
        }
    }

    async fn try_begin_offer(&mut self) -> Result<(), SessionError> {
        self.create_engine()?;
        if let Some(session) = self.session.as_mut() {
            session.role = Role::Offerer;
            session.state = NegotiationState::Negotiating;
        }

        let label = self.config.channel.label.clone();
        let options = self.config.channel.options();
        let engine = self.engine.as_ref().map(|e| e.transport.as_ref());
        self.channels.create(engine, &label, options).await?;
        self.sync_active();

        let engine = self.transport()?;
        let offer = engine
            .create_offer()
            .await
            .map_err(|e| SessionError::negotiation(&e))?;
        engine
            .set_local_description(&offer)
            .await
            .map_err(|e| SessionError::negotiation(&e))?;
        log::info!("[Negotiation] Sending offer");
        self.send_signaling(&SignalingMessage::description(offer))
            .await
    }

    /// Decode and dispatch one relay frame.
    pub(super) async fn handle_signaling_frame(&mut self, frame: &Frame) {
        self.counters.received(frame.len());
        let bytes = match frame {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes.as_slice(),
        };
        self.inspector.record(InspectionRecord::new(
            Direction::Incoming,
            Route::Signaling,
            bytes,
        ));

        match frame.decode() {
            Ok(message) => self.handle_signaling(message).await,
            Err(e) => log::warn!("[Signaling] Ignoring message: {e}"),
        }
    }

    async fn handle_signaling(&mut self, message: SignalingMessage) {
        log::debug!("[Signaling] Received '{}'", message.kind());
        match message {
            SignalingMessage::Offer(offer) => self.handle_offer(offer).await,
            SignalingMessage::Answer(answer) => self.handle_answer(answer).await,
            SignalingMessage::Candidate(candidate) => self.handle_candidate(candidate).await,
            SignalingMessage::FileInfo(info) => {
                log::info!(
                    "[Signaling] file-info for '{}' on the relay, transfers use the data channel",
                    info.name
                );
            }
            SignalingMessage::FileComplete { id } => {
                log::info!("[Signaling] file-complete for {id} on the relay, ignored");
            }
            SignalingMessage::Application(value) => {
                log::info!(
                    "[Signaling] Application message: {}",
                    truncate_text(&value.to_string(), PREVIEW_LEN)
                );
            }
        }
    }

    async fn handle_offer(&mut self, offer: SessionDescription) {
        if !self.session.as_ref().is_some_and(|s| s.is_live()) {
            log::warn!("[Negotiation] Offer received without a session, ignored");
            return;
        }
        if let Err(e) = self.accept_offer(offer).await {
            log::error!("[Negotiation] Failed to answer offer: {e}");
        }
    }

    async fn accept_offer(&mut self, offer: SessionDescription) -> Result<(), SessionError> {
        match self.engine.as_ref().map(|e| e.transport.signaling_state()) {
            Some(SignalingState::Stable) => {}
            Some(SignalingState::HaveLocalOffer) => {
                log::warn!("[Negotiation] Remote offer while our offer is pending, answering theirs");
                self.create_engine()?;
            }
            _ => self.create_engine()?,
        }

        self.transport()?
            .set_remote_description(&offer)
            .await
            .map_err(|e| SessionError::negotiation(&e))?;
        if let Some(session) = self.session.as_mut() {
            session.role = Role::Answerer;
            session.state = NegotiationState::Negotiating;
            session.remote_description_set = true;
        }
        self.flush_candidates().await;

        let engine = self.transport()?;
        let answer = engine
            .create_answer()
            .await
            .map_err(|e| SessionError::negotiation(&e))?;
        engine
            .set_local_description(&answer)
            .await
            .map_err(|e| SessionError::negotiation(&e))?;
        log::info!("[Negotiation] Sending answer");
        self.send_signaling(&SignalingMessage::description(answer))
            .await
    }

    async fn handle_answer(&mut self, answer: SessionDescription) {
        let Some(engine) = self.engine.as_ref() else {
            log::warn!("[Negotiation] Answer received without a peer connection, ignored");
            return;
        };
        if engine.transport.signaling_state() != SignalingState::HaveLocalOffer {
            log::warn!("[Negotiation] Answer received with no offer pending, ignored");
            return;
        }
        if let Err(e) = engine.transport.set_remote_description(&answer).await {
            log::error!("[Negotiation] Failed to apply answer: {e}");
            return;
        }
        log::info!("[Negotiation] Answer applied");
        if let Some(session) = self.session.as_mut() {
            session.remote_description_set = true;
        }
        self.flush_candidates().await;
    }

    async fn handle_candidate(&mut self, candidate: IceCandidateInit) {
        let ready = self.engine.is_some()
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.remote_description_set);
        if !ready {
            self.ice.push(candidate);
            log::debug!("[ICE] Candidate buffered ({} waiting)", self.ice.len());
            return;
        }

        self.flush_candidates().await;
        let Ok(engine) = self.transport() else {
            return;
        };
        let Err(e) = engine.add_ice_candidate(&candidate).await else {
            log::debug!("[ICE] Candidate applied");
            return;
        };
        let line = candidate.candidate.clone();
        if self.ice.push_rejected(candidate) {
            log::warn!("[ICE] Candidate rejected, keeping for next flush: {e}");
        } else {
            log::error!("[ICE] Candidate rejected, giving up: {e}");
            self.inspector.note(&format!("ICE candidate abandoned: {line}"));
        }
    }

    /// Apply buffered candidates to the current engine.
    pub(super) async fn flush_candidates(&mut self) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        let report = self.ice.flush(engine.transport.as_ref()).await;
        if report.applied > 0 {
            log::debug!("[ICE] Applied {} buffered candidates", report.applied);
        }
        for candidate in &report.abandoned {
            self.inspector
                .note(&format!("ICE candidate abandoned: {}", candidate.candidate));
        }
    }
}
