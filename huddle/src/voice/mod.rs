//! Voice rooms: a full mesh of peer media sessions between everyone in a room.
//! - presence and negotiation travel over a relay
//! - media flows directly between participants
//! - mute, deafen and screen share are announced to the room
//!
pub mod participant;
pub mod profile;
pub mod signal;

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    media::{RemoteStream, TrackKind},
    transport::{ConnectionState, SessionId},
};

use self::{
    participant::{Participant, ParticipantId, RoomId},
    profile::ScreenProfile,
};

/// Coordinates the local participant's presence in at most one voice room
#[async_trait]
pub trait VoiceRoom {
    // ------ Misc ------
    /// The event stream notifies the UI of membership and media changes
    async fn get_event_stream(&mut self) -> Result<VoiceEventStream, Error>;

    // ------ Join/Leave ------

    /// acquires the microphone and announces the local participant to the room.
    /// if another room is joined it is left first. joining the current room is a no-op
    async fn join_room(&mut self, room_id: RoomId) -> Result<(), Error>;
    /// tears down every session and releases capture devices
    async fn leave_room(&mut self) -> Result<(), Error>;

    // ------ Media controls ------

    async fn set_muted(&mut self, muted: bool) -> Result<(), Error>;
    async fn set_deafened(&mut self, deafened: bool) -> Result<(), Error>;
    async fn start_screen_share(&mut self) -> Result<(), Error>;
    async fn stop_screen_share(&mut self) -> Result<(), Error>;
    /// applies to the live screen track if sharing, and to future shares
    async fn set_screen_profile(&mut self, profile: ScreenProfile) -> Result<(), Error>;

    // ------ Select input devices ------

    async fn available_microphones(&self) -> Result<Vec<String>, Error>;
    async fn select_microphone(&mut self, device_name: &str) -> Result<(), Error>;

    // ------ Utility Functions ------

    /// participants of the current room, including self, in arrival order
    async fn membership(&self) -> Result<Vec<Participant>, Error>;
    async fn sessions(&self) -> Result<Vec<SessionInfo>, Error>;
    async fn local_state(&self) -> Result<LocalState, Error>;
    async fn current_room(&self) -> Result<Option<RoomId>, Error>;
    async fn phase(&self) -> Result<RoomPhase, Error>;
}

/// Drives the UI
#[derive(Debug, Display, Clone)]
pub enum VoiceEventKind {
    #[display(fmt = "RoomJoined({room_id})")]
    RoomJoined { room_id: RoomId },
    #[display(fmt = "RoomLeft({room_id})")]
    RoomLeft { room_id: RoomId },
    /// the membership table changed
    #[display(fmt = "MembershipChanged")]
    MembershipChanged { participants: Vec<Participant> },
    /// `None` means any rendered media for the participant should be unmounted
    #[display(fmt = "RemoteStreamChanged({participant_id})")]
    RemoteStreamChanged {
        participant_id: ParticipantId,
        stream: Option<RemoteStream>,
    },
    #[display(fmt = "PeerConnected({participant_id})")]
    PeerConnected { participant_id: ParticipantId },
    #[display(fmt = "PeerDisconnected({participant_id})")]
    PeerDisconnected { participant_id: ParticipantId },
    /// negotiation failed. the session is kept but carries no media
    #[display(fmt = "PeerDegraded({participant_id})")]
    PeerDegraded {
        participant_id: ParticipantId,
        reason: String,
    },
    #[display(fmt = "LocalStateChanged")]
    LocalStateChanged {
        muted: bool,
        deafened: bool,
        screen_sharing: bool,
    },
    /// a capture or negotiation problem the user should see
    #[display(fmt = "Error: {_0}")]
    Error(String),
}

pub struct VoiceEventStream(pub BoxStream<'static, VoiceEventKind>);

impl core::ops::Deref for VoiceEventStream {
    type Target = BoxStream<'static, VoiceEventKind>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for VoiceEventStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomPhase {
    #[default]
    #[display(fmt = "idle")]
    Idle,
    #[display(fmt = "joining")]
    Joining,
    #[display(fmt = "active")]
    Active,
    #[display(fmt = "leaving")]
    Leaving,
}

impl RoomPhase {
    pub fn can_transition_to(&self, next: RoomPhase) -> bool {
        use RoomPhase::*;
        matches!(
            (self, next),
            (Idle, Joining) | (Joining, Active) | (Joining, Idle) | (Active, Leaving) | (Leaving, Idle)
        )
    }

    pub fn transition(&mut self, next: RoomPhase) -> Result<(), Error> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

/// Snapshot of one media session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub participant_id: ParticipantId,
    pub session_id: SessionId,
    /// true if this side made the initial offer
    pub offering: bool,
    pub negotiating: bool,
    pub state: ConnectionState,
    pub degraded: bool,
    /// kinds of the locally attached senders
    pub senders: Vec<TrackKind>,
    /// number of offers this side has sent on the session
    pub offers_sent: u32,
}

/// Snapshot of the local participant's flags
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    pub muted: bool,
    pub deafened: bool,
    pub screen_sharing: bool,
    pub screen_profile: ScreenProfile,
}
