#![allow(dead_code)]

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use huddle::{
    error::Error,
    media::{CaptureDevices, LocalTrack, RemoteTrack, TrackKind},
    relay::{Relay, RelayEvent, RelayEventStream, RelayMessage},
    transport::{
        ConnectionState, PeerConnection, PeerConnector, SenderId, SessionId, TransportEvent,
        TransportEventSender,
    },
    voice::{
        participant::{LocalIdentity, Participant, ParticipantId, RoomId},
        profile::ScreenProfile,
        signal::{IceCandidate, SdpType, SessionDescription},
        LocalState, RoomPhase, SessionInfo, VoiceEventKind, VoiceEventStream, VoiceRoom,
    },
};
use huddle_mesh::{config::Config, MeshVoice};
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

pub const ROOM: &str = "general";

// ------ Relay ------

struct Endpoint {
    user_id: String,
    connected: bool,
    ch: broadcast::Sender<RelayEvent>,
}

/// Delivers every message to every connected endpoint, the sender included
#[derive(Default)]
pub struct RelayHub {
    endpoints: Mutex<Vec<Endpoint>>,
    log: Mutex<Vec<RelayMessage>>,
}

impl RelayHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn relay(self: &Arc<Self>, user_id: &str) -> Arc<HubRelay> {
        let (ch, _rx) = broadcast::channel(1024);
        self.endpoints.lock().push(Endpoint {
            user_id: user_id.into(),
            connected: true,
            ch: ch.clone(),
        });
        Arc::new(HubRelay {
            hub: self.clone(),
            user_id: user_id.into(),
            ch,
        })
    }

    /// delivers a message as if some other client or the server had sent it
    pub fn inject(&self, message: RelayMessage) {
        self.deliver(message);
    }

    pub fn disconnect(&self, user_id: &str) {
        self.set_connected(user_id, false);
    }

    pub fn connect(&self, user_id: &str) {
        self.set_connected(user_id, true);
    }

    fn set_connected(&self, user_id: &str, connected: bool) {
        for endpoint in self.endpoints.lock().iter_mut() {
            if endpoint.user_id == user_id && endpoint.connected != connected {
                endpoint.connected = connected;
                let event = if connected {
                    RelayEvent::Connected
                } else {
                    RelayEvent::Disconnected
                };
                let _ = endpoint.ch.send(event);
            }
        }
    }

    fn is_connected(&self, user_id: &str) -> bool {
        self.endpoints
            .lock()
            .iter()
            .any(|e| e.user_id == user_id && e.connected)
    }

    fn deliver(&self, message: RelayMessage) {
        // everything crosses the wire as json
        let text = serde_json::to_string(&message).expect("serialize");
        let message: RelayMessage = serde_json::from_str(&text).expect("deserialize");
        self.log.lock().push(message.clone());
        for endpoint in self.endpoints.lock().iter().filter(|e| e.connected) {
            let _ = endpoint.ch.send(RelayEvent::Message(message.clone()));
        }
    }

    pub fn log(&self) -> Vec<RelayMessage> {
        self.log.lock().clone()
    }

    /// everything `user_id` put on the relay
    pub fn sent_by(&self, user_id: &str) -> Vec<RelayMessage> {
        self.log()
            .into_iter()
            .filter(|m| sender_of(m) == Some(user_id))
            .collect()
    }

    /// descriptions of type `sdp_type` sent by `user_id`
    pub fn descriptions_from(&self, user_id: &str, sdp_type: SdpType) -> usize {
        self.sent_by(user_id)
            .iter()
            .filter(|m| {
                matches!(m, RelayMessage::VoiceSignal { sdp: Some(sdp), .. } if sdp.sdp_type == sdp_type)
            })
            .count()
    }
}

pub fn sender_of(message: &RelayMessage) -> Option<&str> {
    match message {
        RelayMessage::VoiceJoin { user_id, .. }
        | RelayMessage::VoiceLeave { user_id, .. }
        | RelayMessage::VoiceState { user_id, .. }
        | RelayMessage::VoiceSignal { user_id, .. } => Some(user_id),
        _ => None,
    }
}

pub struct HubRelay {
    hub: Arc<RelayHub>,
    user_id: String,
    ch: broadcast::Sender<RelayEvent>,
}

impl Relay for HubRelay {
    fn send(&self, message: RelayMessage) -> Result<(), Error> {
        if !self.hub.is_connected(&self.user_id) {
            return Ok(());
        }
        self.hub.deliver(message);
        Ok(())
    }

    fn subscribe(&self) -> Result<RelayEventStream, Error> {
        let mut rx = self.ch.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(_) => {}
                };
            }
        };
        Ok(RelayEventStream(Box::pin(stream)))
    }
}

// ------ Transport ------

/// Every fake connection created by any connector
#[derive(Default)]
pub struct FakeNetwork {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>, local: &str) -> Arc<FakeConnector> {
        Arc::new(FakeConnector {
            network: self.clone(),
            local: participant(local),
        })
    }

    /// the most recent connection `local` created towards `peer`
    pub fn connection(&self, local: &str, peer: &str) -> Option<Arc<FakeConnection>> {
        self.connections
            .lock()
            .iter()
            .rev()
            .find(|c| c.local.as_str() == local && c.peer.as_str() == peer)
            .cloned()
    }

    pub fn connections(&self, local: &str, peer: &str) -> Vec<Arc<FakeConnection>> {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.local.as_str() == local && c.peer.as_str() == peer)
            .cloned()
            .collect()
    }
}

pub struct FakeConnector {
    network: Arc<FakeNetwork>,
    local: ParticipantId,
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        peer: &ParticipantId,
        session: SessionId,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerConnection>, Error> {
        let connection = Arc::new(FakeConnection {
            local: self.local.clone(),
            peer: peer.clone(),
            session,
            events,
            inner: Mutex::new(ConnectionInner::default()),
        });
        self.network.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

#[derive(Default)]
struct ConnectionInner {
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    senders: HashMap<SenderId, TrackKind>,
    remote_kinds: HashSet<TrackKind>,
    offers_created: u32,
    // a local offer waiting for its answer
    have_local_offer: bool,
    fail_next: bool,
    candidate_sent: bool,
    connected: bool,
    closed: bool,
}

/// Descriptions are `fake <kinds>` where kinds lists the attached senders
pub struct FakeConnection {
    pub local: ParticipantId,
    pub peer: ParticipantId,
    pub session: SessionId,
    events: TransportEventSender,
    inner: Mutex<ConnectionInner>,
}

impl FakeConnection {
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn offers_created(&self) -> u32 {
        self.inner.lock().offers_created
    }

    /// the next description operation on this connection fails
    pub fn fail_next_operation(&self) {
        self.inner.lock().fail_next = true;
    }

    pub fn sender_kinds(&self) -> Vec<TrackKind> {
        let mut kinds: Vec<_> = self.inner.lock().senders.values().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    /// the kinds the remote side currently sends
    pub fn remote_kinds(&self) -> HashSet<TrackKind> {
        self.inner.lock().remote_kinds.clone()
    }

    /// reports a connection state as if the ICE layer had observed it
    pub fn simulate_state(&self, state: ConnectionState) {
        let _ = self.events.send(TransportEvent::StateChanged {
            peer: self.peer.clone(),
            session: self.session,
            state,
        });
    }

    fn describe(inner: &ConnectionInner) -> String {
        let mut kinds: Vec<_> = inner.senders.values().map(|k| k.to_string()).collect();
        kinds.sort();
        format!("fake {}", kinds.join(","))
    }

    fn parse_kinds(sdp: &str) -> HashSet<TrackKind> {
        sdp.split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .split(',')
            .filter_map(|k| match k {
                "audio" => Some(TrackKind::Audio),
                "screen-video" => Some(TrackKind::ScreenVideo),
                _ => None,
            })
            .collect()
    }

    fn maybe_connected(&self, inner: &mut ConnectionInner) {
        if !inner.connected
            && inner.local_description.is_some()
            && inner.remote_description.is_some()
        {
            inner.connected = true;
            self.simulate_state(ConnectionState::Connected);
        }
    }

    fn check_open(inner: &ConnectionInner) -> Result<(), Error> {
        if inner.closed {
            return Err(Error::NegotiationFailed("connection is closed".into()));
        }
        Ok(())
    }

    fn check_failure(inner: &mut ConnectionInner) -> Result<(), Error> {
        Self::check_open(inner)?;
        if std::mem::take(&mut inner.fail_next) {
            return Err(Error::NegotiationFailed("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription, Error> {
        let mut inner = self.inner.lock();
        Self::check_failure(&mut inner)?;
        inner.offers_created += 1;
        Ok(SessionDescription::offer(Self::describe(&inner)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, Error> {
        let mut inner = self.inner.lock();
        Self::check_failure(&mut inner)?;
        match inner.remote_description.as_ref() {
            Some(d) if d.sdp_type == SdpType::Offer => {
                Ok(SessionDescription::answer(Self::describe(&inner)))
            }
            _ => Err(Error::NegotiationFailed("no remote offer".into())),
        }
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        Self::check_failure(&mut inner)?;
        inner.have_local_offer = description.sdp_type == SdpType::Offer;
        inner.local_description = Some(description);
        if !inner.candidate_sent {
            inner.candidate_sent = true;
            let _ = self.events.send(TransportEvent::IceCandidate {
                peer: self.peer.clone(),
                session: self.session,
                candidate: IceCandidate {
                    candidate: format!("candidate:{} 1 udp 1 127.0.0.1 9 typ host", self.local),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                    username_fragment: None,
                },
            });
        }
        self.maybe_connected(&mut inner);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        Self::check_failure(&mut inner)?;
        match description.sdp_type {
            SdpType::Offer if inner.have_local_offer => {
                return Err(Error::NegotiationFailed("have-local-offer".into()));
            }
            SdpType::Answer if !inner.have_local_offer => {
                return Err(Error::NegotiationFailed("answer without local offer".into()));
            }
            SdpType::Answer => inner.have_local_offer = false,
            _ => {}
        }

        let kinds = Self::parse_kinds(&description.sdp);
        for kind in kinds.difference(&inner.remote_kinds) {
            let _ = self.events.send(TransportEvent::TrackAdded {
                peer: self.peer.clone(),
                session: self.session,
                stream_id: self.peer.to_string(),
                track: RemoteTrack::new(Uuid::new_v4().to_string(), *kind, Arc::new(())),
            });
        }
        inner.remote_kinds = kinds;
        inner.remote_description = Some(description);
        self.maybe_connected(&mut inner);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.have_local_offer) {
            inner.local_description = None;
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), Error> {
        let inner = self.inner.lock();
        Self::check_open(&inner)?;
        if inner.remote_description.is_none() {
            return Err(Error::NegotiationFailed(
                "candidate before remote description".into(),
            ));
        }
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<SenderId, Error> {
        let mut inner = self.inner.lock();
        Self::check_open(&inner)?;
        let id = SenderId::random();
        inner.senders.insert(id, track.kind());
        Ok(id)
    }

    async fn remove_track(&self, sender: SenderId) -> Result<(), Error> {
        self.inner.lock().senders.remove(&sender);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.lock().closed = true;
        Ok(())
    }
}

// ------ Capture ------

pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    ended: Notify,
    profile: Mutex<Option<ScreenProfile>>,
}

impl FakeTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            ended: Notify::new(),
            profile: Mutex::new(None),
        }
    }

    /// the capture ended without the coordinator asking, e.g. the OS share dialog was closed
    pub fn end_externally(&self) {
        self.stop();
    }

    pub fn profile(&self) -> Option<ScreenProfile> {
        *self.profile.lock()
    }
}

#[async_trait]
impl LocalTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn apply_profile(&self, profile: &ScreenProfile) -> Result<(), Error> {
        self.profile.lock().replace(*profile);
        Ok(())
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.ended.notify_waiters();
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn ended(&self) {
        let notified = self.ended.notified();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub struct FakeCapture {
    pub deny_microphone: AtomicBool,
    pub deny_screen: AtomicBool,
    microphones: Mutex<Vec<Arc<FakeTrack>>>,
    screens: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeCapture {
    pub fn microphone(&self) -> Option<Arc<FakeTrack>> {
        self.microphones.lock().last().cloned()
    }

    pub fn screen(&self) -> Option<Arc<FakeTrack>> {
        self.screens.lock().last().cloned()
    }

    pub fn microphones_acquired(&self) -> usize {
        self.microphones.lock().len()
    }
}

#[async_trait]
impl CaptureDevices for FakeCapture {
    async fn acquire_microphone(&self) -> Result<Arc<dyn LocalTrack>, Error> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(Error::CaptureDenied("microphone permission denied".into()));
        }
        let track = Arc::new(FakeTrack::new(TrackKind::Audio));
        self.microphones.lock().push(track.clone());
        Ok(track)
    }

    async fn acquire_screen(&self, _profile: &ScreenProfile) -> Result<Arc<dyn LocalTrack>, Error> {
        if self.deny_screen.load(Ordering::SeqCst) {
            return Err(Error::CaptureDenied("screen capture cancelled".into()));
        }
        let track = Arc::new(FakeTrack::new(TrackKind::ScreenVideo));
        self.screens.lock().push(track.clone());
        Ok(track)
    }

    fn available_microphones(&self) -> Result<Vec<String>, Error> {
        Ok(vec!["fake microphone".into()])
    }
}

// ------ Peers ------

pub fn participant(id: &str) -> ParticipantId {
    ParticipantId::new(id).expect("valid participant id")
}

pub fn room() -> RoomId {
    RoomId::new(ROOM)
}

/// One coordinator wired to the shared hub and network
pub struct TestPeer {
    pub id: ParticipantId,
    pub voice: MeshVoice,
    pub capture: Arc<FakeCapture>,
}

#[derive(Debug)]
pub struct Snapshot {
    pub phase: RoomPhase,
    pub room: Option<RoomId>,
    pub membership: Vec<Participant>,
    pub sessions: Vec<SessionInfo>,
    pub local: LocalState,
}

impl Snapshot {
    pub fn member(&self, id: &str) -> Option<&Participant> {
        self.membership.iter().find(|p| p.id.as_str() == id)
    }

    pub fn session(&self, id: &str) -> Option<&SessionInfo> {
        self.sessions.iter().find(|s| s.participant_id.as_str() == id)
    }

    /// `n` sessions, every one of them connected
    pub fn connected_to(&self, n: usize) -> bool {
        self.sessions.len() == n
            && self
                .sessions
                .iter()
                .all(|s| s.state == ConnectionState::Connected && !s.negotiating)
    }
}

impl TestPeer {
    pub fn new(hub: &Arc<RelayHub>, network: &Arc<FakeNetwork>, id: &str) -> anyhow::Result<Self> {
        let capture = Arc::new(FakeCapture::default());
        let voice = MeshVoice::new(
            LocalIdentity {
                id: participant(id),
                display_name: id.to_uppercase(),
            },
            hub.relay(id),
            network.connector(id),
            capture.clone(),
            Config::testing(),
        )?;
        Ok(Self {
            id: participant(id),
            voice,
            capture,
        })
    }

    pub async fn join(&self) -> anyhow::Result<()> {
        self.voice.clone().join_room(room()).await?;
        Ok(())
    }

    pub async fn leave(&self) -> anyhow::Result<()> {
        self.voice.clone().leave_room().await?;
        Ok(())
    }

    pub async fn events(&self) -> anyhow::Result<VoiceEventStream> {
        Ok(self.voice.clone().get_event_stream().await?)
    }

    pub async fn snapshot(&self) -> anyhow::Result<Snapshot> {
        Ok(Snapshot {
            phase: self.voice.phase().await?,
            room: self.voice.current_room().await?,
            membership: self.voice.membership().await?,
            sessions: self.voice.sessions().await?,
            local: self.voice.local_state().await?,
        })
    }

    /// polls until `check` holds or fails after a few seconds
    pub async fn wait_until<F>(&self, what: &str, check: F) -> anyhow::Result<Snapshot>
    where
        F: Fn(&Snapshot) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = self.snapshot().await?;
            if check(&snapshot) {
                return Ok(snapshot);
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("{}: timed out waiting for {what}: {snapshot:#?}", self.id);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// lets in-flight signals and worker operations run out
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

/// every event that arrives until the stream is quiet for a moment
pub async fn drain(stream: &mut VoiceEventStream) -> Vec<VoiceEventKind> {
    let mut events = vec![];
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(300), stream.next()).await
    {
        events.push(event);
    }
    events
}

/// `peers` joined one after the other, with the mesh fully converged
pub async fn converged_room(
    hub: &Arc<RelayHub>,
    network: &Arc<FakeNetwork>,
    ids: &[&str],
) -> anyhow::Result<Vec<TestPeer>> {
    let mut peers = vec![];
    for id in ids {
        let peer = TestPeer::new(hub, network, id)?;
        peer.join().await?;
        peers.push(peer);
        let n = peers.len();
        for peer in &peers {
            peer.wait_until("mesh convergence", |s| {
                s.membership.len() == n && s.connected_to(n - 1)
            })
            .await?;
        }
    }
    Ok(peers)
}
