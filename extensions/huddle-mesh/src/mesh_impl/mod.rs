mod event_handler;
mod lifecycle;
mod local_state;
mod membership;
mod negotiation;
mod registry;
mod router;
mod session;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use huddle::{
    error::Error,
    media::CaptureDevices,
    relay::Relay,
    transport::PeerConnector,
    voice::{
        participant::{LocalIdentity, Participant, RoomId},
        profile::ScreenProfile,
        LocalState, RoomPhase, SessionInfo, VoiceEventKind, VoiceEventStream, VoiceRoom,
    },
};

use crate::config::Config;

use self::event_handler::EventHandler;

/// Full-mesh voice rooms over a relay.
///
/// All state lives on one coordinator task; `MeshVoice` is a cheap handle to it.
/// Several instances may coexist in one process
#[derive(Clone)]
pub struct MeshVoice {
    ui_event_ch: broadcast::Sender<VoiceEventKind>,
    event_handler: EventHandler,
    capture: Arc<dyn CaptureDevices>,
}

impl MeshVoice {
    pub fn new(
        identity: LocalIdentity,
        relay: Arc<dyn Relay>,
        connector: Arc<dyn PeerConnector>,
        capture: Arc<dyn CaptureDevices>,
        config: Config,
    ) -> Result<Self, Error> {
        log::trace!("initializing voice for {}", identity.id);
        let (ui_event_ch, _rx) = broadcast::channel(config.event_channel_capacity.max(1));
        let event_handler = EventHandler::new(
            identity,
            relay,
            connector,
            capture.clone(),
            config,
            ui_event_ch.clone(),
        )?;
        Ok(Self {
            ui_event_ch,
            event_handler,
            capture,
        })
    }
}

#[async_trait]
impl VoiceRoom for MeshVoice {
    // ------ Misc ------
    async fn get_event_stream(&mut self) -> Result<VoiceEventStream, Error> {
        let mut rx = self.ui_event_ch.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("voice event stream lagged by {n} events");
                    }
                };
            }
        };
        Ok(VoiceEventStream(Box::pin(stream)))
    }

    // ------ Join/Leave ------

    async fn join_room(&mut self, room_id: RoomId) -> Result<(), Error> {
        self.event_handler.join_room(room_id).await
    }

    async fn leave_room(&mut self) -> Result<(), Error> {
        self.event_handler.leave_room().await
    }

    // ------ Media controls ------

    async fn set_muted(&mut self, muted: bool) -> Result<(), Error> {
        self.event_handler.set_muted(muted).await
    }

    async fn set_deafened(&mut self, deafened: bool) -> Result<(), Error> {
        self.event_handler.set_deafened(deafened).await
    }

    async fn start_screen_share(&mut self) -> Result<(), Error> {
        self.event_handler.start_screen_share().await
    }

    async fn stop_screen_share(&mut self) -> Result<(), Error> {
        self.event_handler.stop_screen_share().await
    }

    async fn set_screen_profile(&mut self, profile: ScreenProfile) -> Result<(), Error> {
        self.event_handler.set_screen_profile(profile).await
    }

    // ------ Select input devices ------

    async fn available_microphones(&self) -> Result<Vec<String>, Error> {
        self.capture.available_microphones()
    }

    async fn select_microphone(&mut self, device_name: &str) -> Result<(), Error> {
        self.capture.select_microphone(device_name)
    }

    // ------ Utility Functions ------

    async fn membership(&self) -> Result<Vec<Participant>, Error> {
        self.event_handler.membership().await
    }

    async fn sessions(&self) -> Result<Vec<SessionInfo>, Error> {
        self.event_handler.sessions().await
    }

    async fn local_state(&self) -> Result<LocalState, Error> {
        self.event_handler.local_state().await
    }

    async fn current_room(&self) -> Result<Option<RoomId>, Error> {
        self.event_handler.current_room().await
    }

    async fn phase(&self) -> Result<RoomPhase, Error> {
        self.event_handler.phase().await
    }
}
