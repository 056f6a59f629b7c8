use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::participant::{ParticipantId, ParticipantState, RoomId};
use crate::error::Error;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    #[display(fmt = "offer")]
    Offer,
    #[display(fmt = "pranswer")]
    Pranswer,
    #[display(fmt = "answer")]
    Answer,
    #[display(fmt = "rollback")]
    Rollback,
}

/// An SDP blob in the shape browsers put on the wire: `{"type": "offer", "sdp": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.sdp_type == SdpType::Offer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    #[display(fmt = "join")]
    Join,
    #[display(fmt = "leave")]
    Leave,
    #[display(fmt = "state")]
    State,
    #[display(fmt = "offerAnswer")]
    OfferAnswer,
    #[display(fmt = "candidate")]
    Candidate,
}

impl SignalKind {
    pub fn is_point_to_point(&self) -> bool {
        matches!(self, SignalKind::OfferAnswer | SignalKind::Candidate)
    }
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    #[display(fmt = "Join")]
    Join {
        display_name: String,
        state: ParticipantState,
    },
    #[display(fmt = "Leave")]
    Leave,
    /// display name is optional because older clients omit it from state updates
    #[display(fmt = "State")]
    State {
        display_name: Option<String>,
        state: ParticipantState,
    },
    #[display(fmt = "OfferAnswer")]
    OfferAnswer(SessionDescription),
    #[display(fmt = "Candidate")]
    Candidate(IceCandidate),
}

impl SignalPayload {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalPayload::Join { .. } => SignalKind::Join,
            SignalPayload::Leave => SignalKind::Leave,
            SignalPayload::State { .. } => SignalKind::State,
            SignalPayload::OfferAnswer(_) => SignalKind::OfferAnswer,
            SignalPayload::Candidate(_) => SignalKind::Candidate,
        }
    }
}

/// Control message carried by the relay. Point-to-point kinds always carry a target,
/// which is enforced by the constructors and by `validate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    pub room_id: RoomId,
    pub sender_id: ParticipantId,
    pub target_id: Option<ParticipantId>,
    pub payload: SignalPayload,
}

impl std::fmt::Display for SignalEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} from {} in {}", self.payload, self.sender_id, self.room_id)
    }
}

impl SignalEnvelope {
    pub fn broadcast(room_id: RoomId, sender_id: ParticipantId, payload: SignalPayload) -> Self {
        Self {
            room_id,
            sender_id,
            target_id: None,
            payload,
        }
    }

    pub fn direct(
        room_id: RoomId,
        sender_id: ParticipantId,
        target_id: ParticipantId,
        payload: SignalPayload,
    ) -> Self {
        Self {
            room_id,
            sender_id,
            target_id: Some(target_id),
            payload,
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.payload.kind()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.kind().is_point_to_point() && self.target_id.is_none() {
            return Err(Error::InvalidEnvelope(format!(
                "{} envelope without a target",
                self.kind()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn point_to_point_requires_target() {
        let sender = ParticipantId::new("a").unwrap();
        let envelope = SignalEnvelope::broadcast(
            RoomId::new("room"),
            sender,
            SignalPayload::OfferAnswer(SessionDescription::offer("v=0")),
        );
        assert!(matches!(envelope.validate(), Err(Error::InvalidEnvelope(_))));
    }

    #[test]
    fn candidate_uses_browser_field_names() -> anyhow::Result<()> {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let value = serde_json::to_value(&candidate)?;
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
        assert!(value.get("usernameFragment").is_none());
        Ok(())
    }
}
