//! The presence/message relay as seen by the voice coordinator.
//!
//! The relay delivers JSON messages to every participant of a room. `RelayMessage` is the wire
//! shape; `RelayNotice` is the typed view the coordinator works with.

use derive_more::Display;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    voice::{
        participant::{ParticipantId, ParticipantState, RoomId},
        signal::{IceCandidate, SessionDescription, SignalEnvelope, SignalPayload},
    },
};

#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    #[display(fmt = "voice_join")]
    VoiceJoin {
        room_id: String,
        user_id: String,
        username: String,
        #[serde(default)]
        muted: bool,
        #[serde(default)]
        deafened: bool,
        #[serde(default)]
        screen_sharing: bool,
    },
    #[display(fmt = "voice_leave")]
    VoiceLeave {
        room_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    #[display(fmt = "voice_state")]
    VoiceState {
        room_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default)]
        muted: bool,
        #[serde(default)]
        deafened: bool,
        #[serde(default)]
        screen_sharing: bool,
    },
    /// carries either an sdp or a candidate. the sdp wins if both are present
    #[display(fmt = "voice_signal")]
    VoiceSignal {
        room_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp: Option<SessionDescription>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate: Option<IceCandidate>,
    },
    /// a room was removed by an administrator
    #[display(fmt = "room_deleted")]
    RoomDeleted { room_id: String },
    /// a user disconnected from the server entirely
    #[display(fmt = "leave")]
    Leave { user_id: String },
}

/// Typed view of an inbound relay message
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum RelayNotice {
    #[display(fmt = "Signal({_0})")]
    Signal(SignalEnvelope),
    #[display(fmt = "RoomDeleted({_0})")]
    RoomDeleted(RoomId),
    #[display(fmt = "ParticipantOffline({_0})")]
    ParticipantOffline(ParticipantId),
}

impl TryFrom<RelayMessage> for RelayNotice {
    type Error = Error;

    fn try_from(value: RelayMessage) -> Result<Self, Self::Error> {
        let notice = match value {
            RelayMessage::VoiceJoin {
                room_id,
                user_id,
                username,
                muted,
                deafened,
                screen_sharing,
            } => RelayNotice::Signal(SignalEnvelope::broadcast(
                RoomId::new(room_id),
                ParticipantId::new(user_id)?,
                SignalPayload::Join {
                    display_name: username,
                    state: ParticipantState {
                        muted,
                        deafened,
                        screen_sharing,
                    },
                },
            )),
            RelayMessage::VoiceLeave {
                room_id, user_id, ..
            } => RelayNotice::Signal(SignalEnvelope::broadcast(
                RoomId::new(room_id),
                ParticipantId::new(user_id)?,
                SignalPayload::Leave,
            )),
            RelayMessage::VoiceState {
                room_id,
                user_id,
                username,
                muted,
                deafened,
                screen_sharing,
            } => RelayNotice::Signal(SignalEnvelope::broadcast(
                RoomId::new(room_id),
                ParticipantId::new(user_id)?,
                SignalPayload::State {
                    display_name: username,
                    state: ParticipantState {
                        muted,
                        deafened,
                        screen_sharing,
                    },
                },
            )),
            RelayMessage::VoiceSignal {
                room_id,
                user_id,
                target_user_id,
                sdp,
                candidate,
            } => {
                let target = target_user_id
                    .ok_or_else(|| Error::InvalidEnvelope("voice_signal without target".into()))?;
                let payload = match (sdp, candidate) {
                    (Some(sdp), _) => SignalPayload::OfferAnswer(sdp),
                    (None, Some(candidate)) => SignalPayload::Candidate(candidate),
                    (None, None) => {
                        return Err(Error::InvalidEnvelope(
                            "voice_signal without sdp or candidate".into(),
                        ))
                    }
                };
                RelayNotice::Signal(SignalEnvelope::direct(
                    RoomId::new(room_id),
                    ParticipantId::new(user_id)?,
                    ParticipantId::new(target)?,
                    payload,
                ))
            }
            RelayMessage::RoomDeleted { room_id } => {
                RelayNotice::RoomDeleted(RoomId::new(room_id))
            }
            RelayMessage::Leave { user_id } => {
                RelayNotice::ParticipantOffline(ParticipantId::new(user_id)?)
            }
        };
        Ok(notice)
    }
}

impl TryFrom<SignalEnvelope> for RelayMessage {
    type Error = Error;

    fn try_from(envelope: SignalEnvelope) -> Result<Self, Self::Error> {
        envelope.validate()?;
        let room_id = envelope.room_id.to_string();
        let user_id = envelope.sender_id.to_string();
        let target_user_id = envelope.target_id.map(|x| x.to_string());
        let message = match envelope.payload {
            SignalPayload::Join {
                display_name,
                state,
            } => RelayMessage::VoiceJoin {
                room_id,
                user_id,
                username: display_name,
                muted: state.muted,
                deafened: state.deafened,
                screen_sharing: state.screen_sharing,
            },
            SignalPayload::Leave => RelayMessage::VoiceLeave {
                room_id,
                user_id,
                username: None,
            },
            SignalPayload::State {
                display_name,
                state,
            } => RelayMessage::VoiceState {
                room_id,
                user_id,
                username: display_name,
                muted: state.muted,
                deafened: state.deafened,
                screen_sharing: state.screen_sharing,
            },
            SignalPayload::OfferAnswer(sdp) => RelayMessage::VoiceSignal {
                room_id,
                user_id,
                target_user_id,
                sdp: Some(sdp),
                candidate: None,
            },
            SignalPayload::Candidate(candidate) => RelayMessage::VoiceSignal {
                room_id,
                user_id,
                target_user_id,
                sdp: None,
                candidate: Some(candidate),
            },
        };
        Ok(message)
    }
}

#[derive(Debug, Display, Clone)]
pub enum RelayEvent {
    /// the relay connection was (re)established
    #[display(fmt = "Connected")]
    Connected,
    /// the relay connection dropped. messages sent meanwhile are lost
    #[display(fmt = "Disconnected")]
    Disconnected,
    #[display(fmt = "Message({_0})")]
    Message(RelayMessage),
}

pub struct RelayEventStream(pub BoxStream<'static, RelayEvent>);

impl core::ops::Deref for RelayEventStream {
    type Target = BoxStream<'static, RelayEvent>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for RelayEventStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Delivers messages to every participant of a room. Sending is fire-and-forget:
/// an `Ok` only means the message was queued
pub trait Relay: Send + Sync {
    fn send(&self, message: RelayMessage) -> Result<(), Error>;
    fn subscribe(&self) -> Result<RelayEventStream, Error>;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::voice::signal::SignalKind;

    #[test]
    fn parses_voice_join_with_flags() -> anyhow::Result<()> {
        let raw = r#"{"type":"voice_join","room_id":"r1","user_id":"u2","username":"bob","muted":true,"deafened":false,"screen_sharing":false}"#;
        let message: RelayMessage = serde_json::from_str(raw)?;
        let notice = RelayNotice::try_from(message)?;
        let RelayNotice::Signal(envelope) = notice else {
            anyhow::bail!("expected a signal");
        };
        assert_eq!(envelope.kind(), SignalKind::Join);
        assert_eq!(envelope.sender_id.as_str(), "u2");
        assert_eq!(
            envelope.payload,
            SignalPayload::Join {
                display_name: "bob".into(),
                state: ParticipantState {
                    muted: true,
                    deafened: false,
                    screen_sharing: false
                }
            }
        );
        Ok(())
    }

    #[test]
    fn voice_signal_prefers_sdp_over_candidate() -> anyhow::Result<()> {
        let raw = r#"{"type":"voice_signal","room_id":"r1","user_id":"u2","target_user_id":"u1",
            "sdp":{"type":"offer","sdp":"v=0"},"candidate":{"candidate":"c"}}"#;
        let message: RelayMessage = serde_json::from_str(raw)?;
        let RelayNotice::Signal(envelope) = RelayNotice::try_from(message)? else {
            anyhow::bail!("expected a signal");
        };
        assert_eq!(envelope.kind(), SignalKind::OfferAnswer);
        assert_eq!(envelope.target_id.map(|x| x.to_string()), Some("u1".into()));
        Ok(())
    }

    #[test]
    fn voice_signal_without_target_is_rejected() -> anyhow::Result<()> {
        let raw = r#"{"type":"voice_signal","room_id":"r1","user_id":"u2","candidate":{"candidate":"c"}}"#;
        let message: RelayMessage = serde_json::from_str(raw)?;
        assert!(matches!(
            RelayNotice::try_from(message),
            Err(Error::InvalidEnvelope(_))
        ));
        Ok(())
    }

    #[test]
    fn outbound_candidate_matches_wire_shape() -> anyhow::Result<()> {
        let envelope = SignalEnvelope::direct(
            RoomId::new("r1"),
            ParticipantId::new("u1")?,
            ParticipantId::new("u2")?,
            SignalPayload::Candidate(IceCandidate {
                candidate: "c".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }),
        );
        let value = serde_json::to_value(RelayMessage::try_from(envelope)?)?;
        assert_eq!(value["type"], "voice_signal");
        assert_eq!(value["target_user_id"], "u2");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert!(value.get("sdp").is_none());
        Ok(())
    }

    #[test]
    fn server_leave_becomes_offline_notice() -> anyhow::Result<()> {
        let message: RelayMessage = serde_json::from_str(r#"{"type":"leave","user_id":"u9"}"#)?;
        assert_eq!(
            RelayNotice::try_from(message)?,
            RelayNotice::ParticipantOffline(ParticipantId::new("u9")?)
        );
        Ok(())
    }
}
