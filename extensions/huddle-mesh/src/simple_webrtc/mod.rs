//! simple-webrtc
//! Adapts the [webrtc-rs](https://github.com/webrtc-rs/webrtc) library to the `PeerConnector`
//! and `PeerConnection` seams used by the mesh coordinator.
//!
//! this module only exchanges RTP packets. Transforming audio/video into RTP packets is the
//! user's responsibility: write packets into the `WrtcLocalTrack` returned by the capture
//! provider and they are forwarded to every peer the track is attached to. Remote tracks are
//! surfaced as `TrackRemote`s inside `RemoteTrack::handle`.
//!
//! WebRTC requires out of band signalling. Local ICE candidates and connection state changes are
//! emitted as `TransportEvent`s for the coordinator to relay.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use huddle::{
    error::Error,
    media::{LocalTrack, RemoteTrack, TrackKind},
    transport::{
        ConnectionState, PeerConnection, PeerConnector, SenderId, SessionId, TransportEvent,
        TransportEventSender,
    },
    voice::{
        participant::ParticipantId,
        signal::{IceCandidate, SessionDescription},
    },
};
use parking_lot::Mutex;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
pub use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::sdp::extmap::AUDIO_LEVEL_URI;
use webrtc::track::track_remote::TrackRemote;

mod track;
pub use track::WrtcLocalTrack;

/// Creates one `RTCPeerConnection` per media session
pub struct WebRtcConnector {
    api: webrtc::api::API,
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Result<Self> {
        Ok(Self {
            api: create_api()?,
            ice_servers,
        })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        peer: &ParticipantId,
        session: SessionId,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerConnection>, Error> {
        let connection = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(|e| Error::NegotiationFailed(format!("new_peer_connection: {e}")))?,
        );

        // configure callbacks

        let tx = events.clone();
        let dest = peer.clone();
        connection.on_peer_connection_state_change(Box::new(move |c: RTCPeerConnectionState| {
            log::info!("WebRTC connection state for peer {} has changed {}", &dest, c);
            let state = match c {
                RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                    ConnectionState::New
                }
                RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                RTCPeerConnectionState::Connected => ConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => ConnectionState::Failed,
                RTCPeerConnectionState::Closed => ConnectionState::Closed,
            };
            if tx
                .send(TransportEvent::StateChanged {
                    peer: dest.clone(),
                    session,
                    state,
                })
                .is_err()
            {
                log::debug!("dropping {state} for {}: coordinator is gone", &dest);
            }
            Box::pin(futures::future::ready(()))
        }));

        let tx = events.clone();
        let dest = peer.clone();
        connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            if let Some(candidate) = c {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(TransportEvent::IceCandidate {
                            peer: dest.clone(),
                            session,
                            candidate: from_rtc_candidate(init),
                        });
                    }
                    Err(e) => log::error!("failed to serialize ice candidate for {}: {e}", &dest),
                }
            }
            Box::pin(futures::future::ready(()))
        }));

        let dest = peer.clone();
        connection.on_ice_connection_state_change(Box::new(
            move |connection_state: RTCIceConnectionState| {
                log::debug!(
                    "ICE connection state for peer {} has changed {}",
                    &dest,
                    connection_state
                );
                Box::pin(futures::future::ready(()))
            },
        ));

        // remote tracks are keyed by the participant: one stream per peer
        let tx = events;
        let dest = peer.clone();
        connection.on_track(Box::new(
            move |track: Option<Arc<TrackRemote>>, _receiver: Option<Arc<RTCRtpReceiver>>| {
                let tx = tx.clone();
                let dest = dest.clone();
                Box::pin(async move {
                    let track = match track {
                        Some(r) => r,
                        None => return,
                    };
                    let mime_type = track.codec().await.capability.mime_type;
                    let kind = if mime_type.to_lowercase().starts_with("video") {
                        TrackKind::ScreenVideo
                    } else {
                        TrackKind::Audio
                    };
                    log::debug!("{kind} track ({mime_type}) added by {}", &dest);
                    let remote = RemoteTrack::new(Uuid::new_v4().to_string(), kind, track);
                    if tx
                        .send(TransportEvent::TrackAdded {
                            peer: dest.clone(),
                            session,
                            stream_id: dest.to_string(),
                            track: remote,
                        })
                        .is_err()
                    {
                        log::error!("failed to send track added event for peer {}", &dest);
                    }
                })
            },
        ));

        Ok(Arc::new(WrtcConnection {
            peer: peer.clone(),
            connection,
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

/// Keeps an `RTCRtpSender` alive along with the task draining its RTCP packets
struct RtcRtpManager {
    sender: Arc<RTCRtpSender>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for RtcRtpManager {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct WrtcConnection {
    peer: ParticipantId,
    connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<SenderId, RtcRtpManager>>,
}

#[async_trait]
impl PeerConnection for WrtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription, Error> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(negotiation_failed)?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, Error> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(negotiation_failed)?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), Error> {
        // Sets the LocalDescription, and starts our UDP listeners
        // Note: this will start the gathering of ICE candidates
        self.connection
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(negotiation_failed)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), Error> {
        self.connection
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(negotiation_failed)
    }

    async fn rollback(&self) -> Result<(), Error> {
        let rollback: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": "" }))?;
        self.connection
            .set_local_description(rollback)
            .await
            .map_err(negotiation_failed)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), Error> {
        self.connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(negotiation_failed)
    }

    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<SenderId, Error> {
        let rtp_track = match track.as_any().downcast_ref::<WrtcLocalTrack>() {
            Some(t) => t.rtp_track(),
            None => {
                return Err(Error::OtherWithContext(format!(
                    "track {} was not created by this transport",
                    track.id()
                )))
            }
        };
        let rtp_sender = self
            .connection
            .add_track(rtp_track)
            .await
            .map_err(negotiation_failed)?;

        // Read incoming RTCP packets
        // Before these packets are returned they are processed by interceptors. For things
        // like NACK this needs to be called.
        let sender2 = rtp_sender.clone();
        let handle = tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender2.read(&mut rtcp_buf).await {}
            log::debug!("terminating rtp_sender thread");
        });

        let id = SenderId::random();
        self.senders.lock().insert(
            id,
            RtcRtpManager {
                sender: rtp_sender,
                handle,
            },
        );
        Ok(id)
    }

    async fn remove_track(&self, sender: SenderId) -> Result<(), Error> {
        let manager = match self.senders.lock().remove(&sender) {
            Some(r) => r,
            None => {
                log::warn!("sender {sender} not found for peer {}", self.peer);
                return Ok(());
            }
        };
        self.connection
            .remove_track(&manager.sender)
            .await
            .map_err(negotiation_failed)
    }

    async fn close(&self) -> Result<(), Error> {
        self.senders.lock().clear();
        self.connection
            .close()
            .await
            .map_err(|e| Error::OtherWithContext(format!("failed to close peer connection: {e}")))
    }
}

fn negotiation_failed(e: webrtc::Error) -> Error {
    Error::NegotiationFailed(e.to_string())
}

// both types share the browser wire shape
fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, Error> {
    Ok(serde_json::from_value(serde_json::to_value(description)?)?)
}

fn from_rtc_description(description: &RTCSessionDescription) -> Result<SessionDescription, Error> {
    Ok(serde_json::from_value(serde_json::to_value(description)?)?)
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

/// the codec used for microphone tracks
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 1,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

/// the codec used for screen tracks
pub fn vp8_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_owned(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: "".to_owned(),
        rtcp_feedback: vec![],
    }
}

fn create_api() -> Result<webrtc::api::API> {
    let mut media = MediaEngine::default();

    media.register_header_extension(
        webrtc::rtp_transceiver::rtp_codec::RTCRtpHeaderExtensionCapability {
            uri: AUDIO_LEVEL_URI.into(),
        },
        RTPCodecType::Audio,
        Some(RTCRtpTransceiverDirection::Sendrecv),
    )?;

    media.register_codec(
        RTCRtpCodecParameters {
            capability: opus_capability(),
            payload_type: 111,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    media.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                channels: 2,
                ..opus_capability()
            },
            payload_type: 112,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    media.register_codec(
        RTCRtpCodecParameters {
            capability: vp8_capability(),
            payload_type: 96,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    // Create a InterceptorRegistry. This is the user configurable RTP/RTCP Pipeline.
    // This provides NACKs, RTCP Reports and other features. If you are manually managing
    // You MUST create a InterceptorRegistry for each PeerConnection.
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media)?;

    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}
