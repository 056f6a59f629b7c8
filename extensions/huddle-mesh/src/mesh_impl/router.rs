use std::{collections::HashSet, sync::Arc};

use derive_more::Display;
use huddle::{
    error::Error,
    relay::{Relay, RelayMessage},
    voice::{
        participant::{ParticipantId, RoomId},
        signal::{SignalEnvelope, SignalKind, SignalPayload},
    },
};

/// Why an inbound envelope was not delivered
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Dropped {
    #[display(fmt = "not in a room")]
    NotInRoom,
    #[display(fmt = "for another room")]
    OtherRoom,
    #[display(fmt = "own echo")]
    OwnEcho,
    #[display(fmt = "malformed")]
    Malformed,
    #[display(fmt = "addressed to someone else")]
    ForeignTarget,
    #[display(fmt = "late artifact from departed participant")]
    Departed,
}

/// Decides whether an inbound envelope concerns the local participant.
/// `room` is the joined room, or None while not active
pub fn route(
    envelope: &SignalEnvelope,
    local_id: &ParticipantId,
    room: Option<&RoomId>,
    departed: &HashSet<ParticipantId>,
) -> Result<(), Dropped> {
    let room = room.ok_or(Dropped::NotInRoom)?;
    if &envelope.room_id != room {
        return Err(Dropped::OtherRoom);
    }
    if &envelope.sender_id == local_id {
        return Err(Dropped::OwnEcho);
    }
    if envelope.validate().is_err() {
        return Err(Dropped::Malformed);
    }
    let kind = envelope.kind();
    if kind.is_point_to_point() && envelope.target_id.as_ref() != Some(local_id) {
        return Err(Dropped::ForeignTarget);
    }
    // only a fresh join brings a departed participant back
    if kind != SignalKind::Join && departed.contains(&envelope.sender_id) {
        return Err(Dropped::Departed);
    }
    Ok(())
}

/// Puts envelopes from the local participant onto the relay for one room
#[derive(Clone)]
pub struct Outbound {
    relay: Arc<dyn Relay>,
    local_id: ParticipantId,
    room_id: RoomId,
}

impl Outbound {
    pub fn new(relay: Arc<dyn Relay>, local_id: ParticipantId, room_id: RoomId) -> Self {
        Self {
            relay,
            local_id,
            room_id,
        }
    }

    pub fn broadcast(&self, payload: SignalPayload) -> Result<(), Error> {
        self.send(SignalEnvelope::broadcast(
            self.room_id.clone(),
            self.local_id.clone(),
            payload,
        ))
    }

    pub fn direct(&self, target: &ParticipantId, payload: SignalPayload) -> Result<(), Error> {
        self.send(SignalEnvelope::direct(
            self.room_id.clone(),
            self.local_id.clone(),
            target.clone(),
            payload,
        ))
    }

    fn send(&self, envelope: SignalEnvelope) -> Result<(), Error> {
        log::trace!("sending {envelope}");
        let message = RelayMessage::try_from(envelope)?;
        self.relay.send(message)
    }
}
