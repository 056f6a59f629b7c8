//! Point-to-point transport primitives, used by the coordinator as a black box.
use std::sync::Arc;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::Error,
    media::{LocalTrack, RemoteTrack},
    voice::{
        participant::ParticipantId,
        signal::{IceCandidate, SessionDescription},
    },
};

/// Identifies one incarnation of a media session. A peer that leaves and rejoins gets a new id,
/// which lets stale transport events be told apart from current ones
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Handle returned by `add_track`, used to detach the sender again
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(Uuid);

impl SenderId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[display(fmt = "new")]
    New,
    #[display(fmt = "connecting")]
    Connecting,
    #[display(fmt = "connected")]
    Connected,
    #[display(fmt = "disconnected")]
    Disconnected,
    #[display(fmt = "failed")]
    Failed,
    #[display(fmt = "closed")]
    Closed,
}

impl ConnectionState {
    /// states after which the media path is considered gone
    pub fn is_lost(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

#[derive(Debug, Display, Clone)]
pub enum TransportEvent {
    #[display(fmt = "IceCandidate({peer})")]
    IceCandidate {
        peer: ParticipantId,
        session: SessionId,
        candidate: IceCandidate,
    },
    #[display(fmt = "StateChanged({peer}: {state})")]
    StateChanged {
        peer: ParticipantId,
        session: SessionId,
        state: ConnectionState,
    },
    #[display(fmt = "TrackAdded({peer})")]
    TrackAdded {
        peer: ParticipantId,
        session: SessionId,
        stream_id: String,
        track: RemoteTrack,
    },
}

impl TransportEvent {
    pub fn peer(&self) -> &ParticipantId {
        match self {
            TransportEvent::IceCandidate { peer, .. }
            | TransportEvent::StateChanged { peer, .. }
            | TransportEvent::TrackAdded { peer, .. } => peer,
        }
    }

    pub fn session(&self) -> SessionId {
        match self {
            TransportEvent::IceCandidate { session, .. }
            | TransportEvent::StateChanged { session, .. }
            | TransportEvent::TrackAdded { session, .. } => *session,
        }
    }
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// One transport-level connection to a remote participant
#[async_trait::async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, Error>;
    async fn create_answer(&self) -> Result<SessionDescription, Error>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), Error>;
    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), Error>;
    /// discards a local offer that was not answered yet
    async fn rollback(&self) -> Result<(), Error>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), Error>;
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<SenderId, Error>;
    async fn remove_track(&self, sender: SenderId) -> Result<(), Error>;
    /// terminal. any pending operation on the connection fails afterwards
    async fn close(&self) -> Result<(), Error>;
}

/// Creates transport connections. Events of the created connection (local candidates,
/// state changes, remote tracks) are reported on `events`, tagged with `peer` and `session`
#[async_trait::async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        peer: &ParticipantId,
        session: SessionId,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerConnection>, Error>;
}
