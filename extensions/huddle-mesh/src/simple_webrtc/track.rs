use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use huddle::{
    error::Error,
    media::{LocalTrack, TrackKind},
    voice::profile::{ScreenProfile, TrackConstraints},
};
use parking_lot::RwLock;
use tokio::sync::Notify;
use uuid::Uuid;
use webrtc::{
    rtp::packet::Packet,
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::{track_local_static_rtp::TrackLocalStaticRTP, TrackLocalWriter},
};

/// A local track backed by a `TrackLocalStaticRTP`.
///
/// The embedding application packetizes captured media and calls `write_rtp`. While the track is
/// disabled (muted or deafened) packets are discarded, which the remote side hears as silence.
pub struct WrtcLocalTrack {
    kind: TrackKind,
    rtp: Arc<TrackLocalStaticRTP>,
    enabled: AtomicBool,
    stopped: AtomicBool,
    ended: Notify,
    constraints: RwLock<TrackConstraints>,
}

impl WrtcLocalTrack {
    pub fn new(kind: TrackKind, codec: RTCRtpCodecCapability, stream_id: &str) -> Self {
        let rtp = Arc::new(TrackLocalStaticRTP::new(
            codec,
            Uuid::new_v4().to_string(),
            stream_id.to_string(),
        ));
        Self {
            kind,
            rtp,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            ended: Notify::new(),
            constraints: RwLock::new(TrackConstraints::default()),
        }
    }

    /// the track handed to peer connections
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticRTP> {
        self.rtp.clone()
    }

    /// the capture constraints the producer should honor
    pub fn constraints(&self) -> TrackConstraints {
        *self.constraints.read()
    }

    /// forwards a packet to every peer connection the track is attached to
    pub async fn write_rtp(&self, packet: &Packet) -> anyhow::Result<()> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(());
        }
        self.rtp.write_rtp(packet).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LocalTrack for WrtcLocalTrack {
    fn id(&self) -> String {
        use webrtc::track::track_local::TrackLocal;
        self.rtp.id().to_string()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn apply_profile(&self, profile: &ScreenProfile) -> Result<(), Error> {
        if self.kind != TrackKind::ScreenVideo {
            return Err(Error::CaptureUnsupported(
                "profiles only apply to screen tracks".into(),
            ));
        }
        *self.constraints.write() = profile.constraints();
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
