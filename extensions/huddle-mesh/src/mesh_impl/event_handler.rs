use futures::{channel::oneshot, StreamExt};
use std::sync::Arc;
use tokio::{
    sync::{
        broadcast,
        mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender},
    },
    task::JoinHandle,
};

use huddle::{
    error::Error,
    media::{CaptureDevices, LocalTrack, RemoteStream, TrackKind},
    relay::{Relay, RelayEvent, RelayEventStream, RelayNotice},
    transport::{ConnectionState, PeerConnector, TransportEvent, TransportEventSender},
    voice::{
        participant::{LocalIdentity, Participant, ParticipantId, RoomId},
        profile::ScreenProfile,
        signal::{SdpType, SessionDescription, SignalEnvelope, SignalPayload},
        LocalState, RoomPhase, SessionInfo, VoiceEventKind,
    },
};

use crate::config::Config;

use super::{
    lifecycle::RoomLifecycle,
    local_state::LocalCallState,
    membership::MembershipTable,
    negotiation::InboundOffer,
    registry::SessionRegistry,
    router::{self, Outbound},
    session::{MediaSession, ReportKind, SessionContext, SessionReport},
};

enum EventHandlerCmd {
    JoinRoom {
        room_id: RoomId,
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    LeaveRoom {
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    SetMuted {
        muted: bool,
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    SetDeafened {
        deafened: bool,
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    StartScreenShare {
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    StopScreenShare {
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    SetScreenProfile {
        profile: ScreenProfile,
        rsp: oneshot::Sender<Result<(), Error>>,
    },
    /// the screen capture ended without being asked to
    ScreenTrackEnded {
        track_id: String,
    },
    GetMembership {
        rsp: oneshot::Sender<Vec<Participant>>,
    },
    GetSessions {
        rsp: oneshot::Sender<Vec<SessionInfo>>,
    },
    GetLocalState {
        rsp: oneshot::Sender<LocalState>,
    },
    GetCurrentRoom {
        rsp: oneshot::Sender<Option<RoomId>>,
    },
    GetPhase {
        rsp: oneshot::Sender<RoomPhase>,
    },
}

/// Handle to the coordinator task. The task quits once every handle is dropped
#[derive(Clone)]
pub struct EventHandler {
    ch: UnboundedSender<EventHandlerCmd>,
}

impl EventHandler {
    pub fn new(
        identity: LocalIdentity,
        relay: Arc<dyn Relay>,
        connector: Arc<dyn PeerConnector>,
        capture: Arc<dyn CaptureDevices>,
        config: Config,
        ui_event_ch: broadcast::Sender<VoiceEventKind>,
    ) -> Result<Self, Error> {
        let relay_stream = relay.subscribe()?;
        let (tx, cmd_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let coordinator = Coordinator {
            local: LocalCallState::new(config.screen_profile),
            identity,
            relay,
            connector,
            capture,
            config,
            cmd_ch: tx.downgrade(),
            transport_tx,
            report_tx,
            ui_event_ch,
            lifecycle: RoomLifecycle::new(),
            membership: MembershipTable::new(),
            registry: SessionRegistry::new(),
            outbound: None,
            screen_watcher: None,
            mesh_dropped: false,
        };

        tokio::spawn(async move {
            run(coordinator, cmd_rx, relay_stream, transport_rx, report_rx).await;
        });
        Ok(Self { ch: tx })
    }

    async fn request<T>(
        &self,
        cmd: impl FnOnce(oneshot::Sender<T>) -> EventHandlerCmd,
    ) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        self.ch
            .send(cmd(tx))
            .map_err(|x| Error::OtherWithContext(x.to_string()))?;
        Ok(rx.await?)
    }

    pub async fn join_room(&self, room_id: RoomId) -> Result<(), Error> {
        self.request(|rsp| EventHandlerCmd::JoinRoom { room_id, rsp })
            .await?
    }

    pub async fn leave_room(&self) -> Result<(), Error> {
        self.request(|rsp| EventHandlerCmd::LeaveRoom { rsp }).await?
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), Error> {
        self.request(|rsp| EventHandlerCmd::SetMuted { muted, rsp })
            .await?
    }

    pub async fn set_deafened(&self, deafened: bool) -> Result<(), Error> {
        self.request(|rsp| EventHandlerCmd::SetDeafened { deafened, rsp })
            .await?
    }

    pub async fn start_screen_share(&self) -> Result<(), Error> {
        self.request(|rsp| EventHandlerCmd::StartScreenShare { rsp })
            .await?
    }

    pub async fn stop_screen_share(&self) -> Result<(), Error> {
        self.request(|rsp| EventHandlerCmd::StopScreenShare { rsp })
            .await?
    }

    pub async fn set_screen_profile(&self, profile: ScreenProfile) -> Result<(), Error> {
        self.request(|rsp| EventHandlerCmd::SetScreenProfile { profile, rsp })
            .await?
    }

    pub async fn membership(&self) -> Result<Vec<Participant>, Error> {
        self.request(|rsp| EventHandlerCmd::GetMembership { rsp })
            .await
    }

    pub async fn sessions(&self) -> Result<Vec<SessionInfo>, Error> {
        self.request(|rsp| EventHandlerCmd::GetSessions { rsp }).await
    }

    pub async fn local_state(&self) -> Result<LocalState, Error> {
        self.request(|rsp| EventHandlerCmd::GetLocalState { rsp })
            .await
    }

    pub async fn current_room(&self) -> Result<Option<RoomId>, Error> {
        self.request(|rsp| EventHandlerCmd::GetCurrentRoom { rsp })
            .await
    }

    pub async fn phase(&self) -> Result<RoomPhase, Error> {
        self.request(|rsp| EventHandlerCmd::GetPhase { rsp }).await
    }
}

async fn run(
    mut coordinator: Coordinator,
    mut cmd_rx: UnboundedReceiver<EventHandlerCmd>,
    mut relay_stream: RelayEventStream,
    mut transport_rx: UnboundedReceiver<TransportEvent>,
    mut report_rx: UnboundedReceiver<SessionReport>,
) {
    let mut relay_open = true;
    loop {
        tokio::select! {
            opt = cmd_rx.recv() => {
                let cmd = match opt {
                    Some(r) => r,
                    None => {
                        log::debug!("voice handler cmd_rx channel is closed. quitting");
                        break;
                    }
                };
                coordinator.handle_cmd(cmd).await;
            }
            opt = relay_stream.next(), if relay_open => {
                match opt {
                    Some(event) => coordinator.handle_relay_event(event),
                    None => {
                        log::warn!("relay event stream closed");
                        relay_open = false;
                        coordinator.handle_relay_event(RelayEvent::Disconnected);
                    }
                }
            }
            Some(event) = transport_rx.recv() => {
                coordinator.handle_transport_event(event);
            }
            Some(report) = report_rx.recv() => {
                coordinator.handle_report(report);
            }
        }
    }

    if let Err(e) = coordinator.leave_room() {
        log::error!("failed to leave room on shutdown: {e}");
    }
}

struct Coordinator {
    identity: LocalIdentity,
    relay: Arc<dyn Relay>,
    connector: Arc<dyn PeerConnector>,
    capture: Arc<dyn CaptureDevices>,
    config: Config,
    // weak so the coordinator does not keep itself alive
    cmd_ch: WeakUnboundedSender<EventHandlerCmd>,
    transport_tx: TransportEventSender,
    report_tx: UnboundedSender<SessionReport>,
    ui_event_ch: broadcast::Sender<VoiceEventKind>,

    lifecycle: RoomLifecycle,
    membership: MembershipTable,
    registry: SessionRegistry,
    local: LocalCallState,
    // Some while a room is joined
    outbound: Option<Outbound>,
    screen_watcher: Option<JoinHandle<()>>,
    // set when the relay dropped while in a room and the mesh was reset
    mesh_dropped: bool,
}

impl Coordinator {
    async fn handle_cmd(&mut self, cmd: EventHandlerCmd) {
        match cmd {
            EventHandlerCmd::JoinRoom { room_id, rsp } => {
                let _ = rsp.send(self.join_room(room_id).await);
            }
            EventHandlerCmd::LeaveRoom { rsp } => {
                let _ = rsp.send(self.leave_room());
            }
            EventHandlerCmd::SetMuted { muted, rsp } => {
                let _ = rsp.send(self.set_muted(muted));
            }
            EventHandlerCmd::SetDeafened { deafened, rsp } => {
                let _ = rsp.send(self.set_deafened(deafened));
            }
            EventHandlerCmd::StartScreenShare { rsp } => {
                let _ = rsp.send(self.start_screen_share().await);
            }
            EventHandlerCmd::StopScreenShare { rsp } => {
                let _ = rsp.send(self.stop_screen_share());
            }
            EventHandlerCmd::SetScreenProfile { profile, rsp } => {
                self.local.set_screen_profile(profile);
                if let Some(screen) = self.local.screen() {
                    if let Err(e) = screen.apply_profile(&profile).await {
                        log::warn!("failed to apply screen profile {}: {e}", profile.label());
                    }
                }
                let _ = rsp.send(Ok(()));
            }
            EventHandlerCmd::ScreenTrackEnded { track_id } => {
                let current = self.local.screen().map(|t| t.id());
                if current.as_deref() == Some(track_id.as_str()) {
                    log::info!("screen capture ended");
                    if let Err(e) = self.stop_screen_share() {
                        log::error!("failed to stop screen share: {e}");
                    }
                }
            }
            EventHandlerCmd::GetMembership { rsp } => {
                let _ = rsp.send(self.membership.all());
            }
            EventHandlerCmd::GetSessions { rsp } => {
                let _ = rsp.send(self.registry.infos());
            }
            EventHandlerCmd::GetLocalState { rsp } => {
                let _ = rsp.send(self.local.snapshot());
            }
            EventHandlerCmd::GetCurrentRoom { rsp } => {
                let _ = rsp.send(self.lifecycle.active_room().cloned());
            }
            EventHandlerCmd::GetPhase { rsp } => {
                let _ = rsp.send(self.lifecycle.phase());
            }
        }
    }

    fn emit(&self, event: VoiceEventKind) {
        if let Err(e) = self.ui_event_ch.send(event) {
            log::trace!("no listener for voice event: {e}");
        }
    }

    fn emit_membership(&self) {
        self.emit(VoiceEventKind::MembershipChanged {
            participants: self.membership.all(),
        });
    }

    fn ensure_active(&self) -> Result<(), Error> {
        match self.lifecycle.active_room() {
            Some(_) => Ok(()),
            None => Err(Error::NotInRoom),
        }
    }

    fn local_participant(&self) -> Participant {
        Participant::new(
            self.identity.id.clone(),
            self.identity.display_name.clone(),
            self.local.participant_state(),
        )
    }

    fn broadcast(&self, payload: SignalPayload) {
        let Some(outbound) = self.outbound.as_ref() else {
            return;
        };
        let kind = payload.kind();
        if let Err(e) = outbound.broadcast(payload) {
            log::error!("failed to send {kind} signal: {e}");
        }
    }

    fn announce_join(&self) {
        self.broadcast(SignalPayload::Join {
            display_name: self.identity.display_name.clone(),
            state: self.local.participant_state(),
        });
    }

    fn announce_state(&self) {
        self.broadcast(SignalPayload::State {
            display_name: Some(self.identity.display_name.clone()),
            state: self.local.participant_state(),
        });
    }

    // ------ Room lifecycle ------

    async fn join_room(&mut self, room_id: RoomId) -> Result<(), Error> {
        if self.lifecycle.active_room() == Some(&room_id) {
            log::debug!("already in room {room_id}");
            return Ok(());
        }
        if self.lifecycle.phase() == RoomPhase::Active {
            self.leave_room()?;
        }

        self.lifecycle.begin_join(room_id.clone())?;
        let microphone = match self.capture.acquire_microphone().await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("failed to acquire microphone: {e}");
                self.lifecycle.abort_join()?;
                self.emit(VoiceEventKind::Error(e.to_string()));
                return Err(e);
            }
        };
        self.local.set_microphone(microphone);

        let outbound = Outbound::new(self.relay.clone(), self.identity.id.clone(), room_id.clone());
        self.registry.activate(SessionContext {
            connector: self.connector.clone(),
            transport_events: self.transport_tx.clone(),
            reports: self.report_tx.clone(),
            outbound: outbound.clone(),
            negotiation_timeout: self.config.negotiation_timeout,
        });
        self.outbound = Some(outbound);
        self.membership.reset(self.local_participant());
        self.lifecycle.complete_join()?;

        self.announce_join();
        self.emit(VoiceEventKind::RoomJoined { room_id });
        self.emit_membership();
        Ok(())
    }

    fn leave_room(&mut self) -> Result<(), Error> {
        if self.lifecycle.phase() == RoomPhase::Idle {
            return Ok(());
        }
        let room_id = self.lifecycle.begin_leave()?;

        // peers are about to be torn down. no renegotiation, no state broadcast
        if let Some(screen) = self.local.take_screen() {
            screen.stop();
        }
        self.stop_screen_watcher();

        self.broadcast(SignalPayload::Leave);
        for peer in self.registry.teardown_all() {
            self.emit(VoiceEventKind::RemoteStreamChanged {
                participant_id: peer,
                stream: None,
            });
        }
        self.registry.deactivate();
        self.outbound = None;
        self.mesh_dropped = false;
        self.local.release();
        self.membership.clear();
        self.lifecycle.finish_leave()?;

        self.emit(VoiceEventKind::RoomLeft { room_id });
        self.emit_membership();
        Ok(())
    }

    /// drops every session and forgets remote members but stays in the room
    fn reset_mesh(&mut self) {
        for peer in self.registry.teardown_all() {
            self.emit(VoiceEventKind::RemoteStreamChanged {
                participant_id: peer.clone(),
                stream: None,
            });
            self.emit(VoiceEventKind::PeerDisconnected {
                participant_id: peer,
            });
        }
        self.membership.reset(self.local_participant());
        self.emit_membership();
    }

    // ------ Local capabilities ------

    fn local_state_changed(&mut self) {
        self.membership.upsert(self.local_participant());
        self.announce_state();
        let state = self.local.participant_state();
        self.emit(VoiceEventKind::LocalStateChanged {
            muted: state.muted,
            deafened: state.deafened,
            screen_sharing: state.screen_sharing,
        });
        self.emit_membership();
    }

    fn set_muted(&mut self, muted: bool) -> Result<(), Error> {
        self.ensure_active()?;
        if self.local.set_muted(muted) {
            self.local_state_changed();
        }
        Ok(())
    }

    fn set_deafened(&mut self, deafened: bool) -> Result<(), Error> {
        self.ensure_active()?;
        if self.local.set_deafened(deafened) {
            self.local_state_changed();
        }
        Ok(())
    }

    async fn start_screen_share(&mut self) -> Result<(), Error> {
        self.ensure_active()?;
        if self.local.screen_sharing() {
            return Ok(());
        }

        let profile = self.local.screen_profile();
        let track = match self.capture.acquire_screen(&profile).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("failed to acquire screen: {e}");
                self.emit(VoiceEventKind::Error(e.to_string()));
                return Err(e);
            }
        };
        if let Err(e) = track.apply_profile(&profile).await {
            log::warn!("failed to apply screen profile {}: {e}", profile.label());
        }
        log::info!("sharing screen at {}", profile.label());

        self.local.set_screen(track.clone());
        for session in self.registry.iter_mut() {
            session.attach(track.clone());
            session.renegotiate();
        }
        self.watch_screen(track);
        self.local_state_changed();
        Ok(())
    }

    fn stop_screen_share(&mut self) -> Result<(), Error> {
        self.ensure_active()?;
        let Some(track) = self.local.take_screen() else {
            return Ok(());
        };
        self.stop_screen_watcher();

        for session in self.registry.iter_mut() {
            session.detach(TrackKind::ScreenVideo);
            session.renegotiate();
        }
        track.stop();
        self.local_state_changed();
        Ok(())
    }

    fn watch_screen(&mut self, track: Arc<dyn LocalTrack>) {
        let ch = self.cmd_ch.clone();
        let handle = tokio::spawn(async move {
            track.ended().await;
            if let Some(ch) = ch.upgrade() {
                let _ = ch.send(EventHandlerCmd::ScreenTrackEnded {
                    track_id: track.id(),
                });
            }
        });
        if let Some(previous) = self.screen_watcher.replace(handle) {
            previous.abort();
        }
    }

    fn stop_screen_watcher(&mut self) {
        if let Some(handle) = self.screen_watcher.take() {
            handle.abort();
        }
    }

    // ------ Relay ------

    fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => {
                if self.lifecycle.active_room().is_some() {
                    log::info!("relay connected. announcing presence");
                    // peers still hold sessions that were dropped on this side
                    if std::mem::take(&mut self.mesh_dropped) {
                        self.broadcast(SignalPayload::Leave);
                    }
                    self.announce_join();
                }
            }
            RelayEvent::Disconnected => {
                if self.lifecycle.active_room().is_some() {
                    log::warn!("relay disconnected. dropping all sessions");
                    self.reset_mesh();
                    self.mesh_dropped = true;
                }
            }
            RelayEvent::Message(message) => match RelayNotice::try_from(message) {
                Ok(notice) => self.handle_notice(notice),
                Err(e) => log::debug!("dropping relay message: {e}"),
            },
        }
    }

    fn handle_notice(&mut self, notice: RelayNotice) {
        match notice {
            RelayNotice::RoomDeleted(room_id) => {
                if self.lifecycle.active_room() == Some(&room_id) {
                    log::info!("room {room_id} was deleted");
                    if let Err(e) = self.leave_room() {
                        log::error!("failed to leave deleted room: {e}");
                    }
                }
            }
            RelayNotice::ParticipantOffline(peer) => {
                if self.lifecycle.active_room().is_some()
                    && (self.membership.contains(&peer) || self.registry.contains(&peer))
                {
                    log::info!("{peer} went offline");
                    self.remove_participant(&peer);
                }
            }
            RelayNotice::Signal(envelope) => {
                if let Err(reason) = router::route(
                    &envelope,
                    &self.identity.id,
                    self.lifecycle.active_room(),
                    self.registry.departed(),
                ) {
                    log::debug!(
                        "{}",
                        Error::UnroutableSignal(format!("{envelope}: {reason}"))
                    );
                    return;
                }
                self.handle_signal(envelope);
            }
        }
    }

    fn handle_signal(&mut self, envelope: SignalEnvelope) {
        let peer = envelope.sender_id;
        match envelope.payload {
            SignalPayload::Join {
                display_name,
                state,
            } => {
                log::info!("{peer} joined");
                self.registry.forget_departed(&peer);
                self.membership
                    .upsert(Participant::new(peer.clone(), display_name, state));
                match self.registry.get(&peer).map(|s| s.is_usable()) {
                    Some(true) => log::debug!("{peer} joined again. keeping the live session"),
                    Some(false) => {
                        log::info!("{peer} joined again. restarting session");
                        self.registry.teardown(&peer);
                        self.emit(VoiceEventKind::RemoteStreamChanged {
                            participant_id: peer.clone(),
                            stream: None,
                        });
                        self.offer_to_newcomer(&peer);
                    }
                    None => self.offer_to_newcomer(&peer),
                }
                if self.config.announce_state_on_join {
                    self.announce_state();
                }
                self.emit_membership();
            }
            SignalPayload::Leave => {
                log::info!("{peer} left");
                self.remove_participant(&peer);
            }
            SignalPayload::State {
                display_name,
                state,
            } => {
                let upserted = self.membership.update_state(&peer, display_name, state);
                if upserted.screen_sharing_changed {
                    // a stopped share never comes back on the same track
                    if !state.screen_sharing {
                        if let Some(stream) = self
                            .registry
                            .get_mut(&peer)
                            .and_then(|s| s.remote_stream.as_mut())
                        {
                            stream.remove_kind(TrackKind::ScreenVideo);
                        }
                    }
                    self.refresh_remote_stream(&peer);
                }
                if upserted.changed {
                    self.emit_membership();
                }
            }
            SignalPayload::OfferAnswer(sdp) => match sdp.sdp_type {
                SdpType::Offer => self.handle_offer(&peer, sdp),
                SdpType::Answer => self.handle_answer(&peer, sdp),
                other => log::debug!("ignoring {other} description from {peer}"),
            },
            SignalPayload::Candidate(candidate) => match self.registry.get(&peer) {
                Some(session) => session.add_candidate(candidate),
                None => log::debug!("dropping candidate from {peer}: no session"),
            },
        }
    }

    // already present, so this side offers
    fn offer_to_newcomer(&mut self, peer: &ParticipantId) {
        match self.open_session(peer, true) {
            Ok(session) => session.renegotiate(),
            Err(e) => log::error!("failed to create session for {peer}: {e}"),
        }
    }

    /// the session for `peer`, created with every live local track attached
    fn open_session(
        &mut self,
        peer: &ParticipantId,
        offering: bool,
    ) -> Result<&mut MediaSession, Error> {
        let tracks = self.local.tracks();
        let (session, created) = self.registry.get_or_create(peer, offering)?;
        if created {
            for track in tracks {
                session.attach(track);
            }
        }
        Ok(session)
    }

    fn handle_offer(&mut self, peer: &ParticipantId, sdp: SessionDescription) {
        if !self.membership.contains(peer) {
            self.membership
                .upsert(Participant::new(peer.clone(), "", Default::default()));
            self.emit_membership();
        }
        // on colliding offers the lower id keeps its own
        let keeps_own = self.identity.id < *peer;
        let session = match self.open_session(peer, false) {
            Ok(r) => r,
            Err(e) => {
                log::error!("failed to create session for {peer}: {e}");
                return;
            }
        };
        match session.negotiation.inbound_offer(keeps_own) {
            InboundOffer::Ignore => {
                log::debug!("ignoring offer from {peer}: own offer outstanding");
            }
            InboundOffer::Answer { round, rollback } => {
                if rollback {
                    log::info!("offer collision with {peer}. answering theirs first");
                }
                session.answer(round, sdp, rollback);
            }
        }
    }

    fn handle_answer(&mut self, peer: &ParticipantId, sdp: SessionDescription) {
        let Some(session) = self.registry.get_mut(peer) else {
            log::debug!("dropping answer from {peer}: no session");
            return;
        };
        match session.negotiation.outstanding_offer() {
            Some(round) => session.apply_answer(round, sdp),
            None => log::debug!("dropping answer from {peer}: no offer outstanding"),
        }
    }

    /// cleanup for a participant that left or whose transport is gone.
    /// nothing is sent on their behalf
    fn remove_participant(&mut self, peer: &ParticipantId) {
        let was_member = self.membership.remove(peer).is_some();
        let had_session = self.registry.teardown(peer).is_some();
        self.registry.mark_departed(peer);
        if had_session {
            self.emit(VoiceEventKind::RemoteStreamChanged {
                participant_id: peer.clone(),
                stream: None,
            });
            self.emit(VoiceEventKind::PeerDisconnected {
                participant_id: peer.clone(),
            });
        }
        if was_member {
            self.emit_membership();
        }
    }

    /// emits the remote stream as it should be rendered. screen video is only shown while the
    /// participant announces a screen share
    fn refresh_remote_stream(&mut self, peer: &ParticipantId) {
        let sharing = self
            .membership
            .get(peer)
            .map(|p| p.state.screen_sharing)
            .unwrap_or_default();
        let Some(mut visible) = self
            .registry
            .get(peer)
            .and_then(|s| s.remote_stream.clone())
        else {
            return;
        };
        if !sharing {
            visible.remove_kind(TrackKind::ScreenVideo);
        }
        self.emit(VoiceEventKind::RemoteStreamChanged {
            participant_id: peer.clone(),
            stream: Some(visible),
        });
    }

    // ------ Transport ------

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let peer = event.peer().clone();
        let Some(session) = self.registry.get_current(&peer, event.session()) else {
            log::trace!("dropping stale transport event {event}");
            return;
        };
        match event {
            TransportEvent::IceCandidate { candidate, .. } => {
                if let Some(outbound) = self.outbound.as_ref() {
                    if let Err(e) = outbound.direct(&peer, SignalPayload::Candidate(candidate)) {
                        log::error!("failed to send ice candidate to {peer}: {e}");
                    }
                }
            }
            TransportEvent::StateChanged { state, .. } => {
                let previous = std::mem::replace(&mut session.state, state);
                if previous == state {
                    return;
                }
                log::info!("connection to {peer} is {state}");
                if state == ConnectionState::Connected {
                    self.emit(VoiceEventKind::PeerConnected {
                        participant_id: peer,
                    });
                } else if state.is_lost() {
                    log::warn!("{}: {peer}", Error::TransportLost);
                    self.remove_participant(&peer);
                }
            }
            TransportEvent::TrackAdded {
                stream_id, track, ..
            } => {
                log::debug!("{} track {} from {peer}", track.kind, track.id);
                session
                    .remote_stream
                    .get_or_insert_with(|| RemoteStream::new(stream_id))
                    .upsert(track);
                self.refresh_remote_stream(&peer);
            }
        }
    }

    fn handle_report(&mut self, report: SessionReport) {
        let peer = report.peer;
        let Some(session) = self.registry.get_current(&peer, report.session) else {
            log::trace!("dropping stale session report {}", report.kind);
            return;
        };
        match report.kind {
            ReportKind::OfferSent { .. } => {
                session.offers_sent += 1;
            }
            ReportKind::AnswerSent { round } | ReportKind::AnswerApplied { round } => {
                session.settle(round);
            }
            ReportKind::RoundTimedOut { round } => {
                if session.negotiation.current().map(|r| r.id) == Some(round) {
                    log::warn!("negotiation with {peer} timed out");
                    session.settle(round);
                }
            }
            ReportKind::ConnectFailed { reason } => {
                session.degraded = true;
                session.negotiation.reset();
                self.emit(VoiceEventKind::PeerDegraded {
                    participant_id: peer,
                    reason,
                });
            }
            ReportKind::Failed { round, reason } => {
                log::warn!("{}", Error::NegotiationFailed(format!("{peer}: {reason}")));
                session.degraded = true;
                if let Some(round) = round {
                    session.settle(round);
                }
                self.emit(VoiceEventKind::PeerDegraded {
                    participant_id: peer,
                    reason,
                });
            }
        }
    }
}
