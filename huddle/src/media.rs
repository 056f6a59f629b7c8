//! Capture and playback primitives the coordinator consumes as opaque tracks.
use std::{any::Any, sync::Arc};

use derive_more::Display;

use crate::{error::Error, voice::profile::ScreenProfile};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    #[display(fmt = "audio")]
    Audio,
    #[display(fmt = "screen-video")]
    ScreenVideo,
}

/// A live, locally captured track. The same track is attached to every session,
/// so implementations must be cheap to share.
#[async_trait::async_trait]
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> TrackKind;

    /// a disabled track keeps its sender but produces silence/black frames
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;

    /// re-applies capture constraints to a live track. best effort
    async fn apply_profile(&self, profile: &ScreenProfile) -> Result<(), Error>;

    fn stop(&self);
    fn is_stopped(&self) -> bool;

    /// resolves once the track ended, either via `stop` or because the source went away
    async fn ended(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Source of local tracks
#[async_trait::async_trait]
pub trait CaptureDevices: Send + Sync {
    async fn acquire_microphone(&self) -> Result<Arc<dyn LocalTrack>, Error>;
    async fn acquire_screen(&self, profile: &ScreenProfile) -> Result<Arc<dyn LocalTrack>, Error>;

    fn available_microphones(&self) -> Result<Vec<String>, Error> {
        Err(Error::CaptureUnsupported("device enumeration".into()))
    }

    fn select_microphone(&self, _device_name: &str) -> Result<(), Error> {
        Err(Error::CaptureUnsupported("device selection".into()))
    }
}

/// A track received from a remote participant. `handle` is whatever the transport hands out
/// (for webrtc-rs this is the `TrackRemote`); the render layer downcasts it.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub handle: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, handle: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            id: id.into(),
            kind,
            handle,
        }
    }
}

/// The most recently negotiated media from one remote participant
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: vec![],
        }
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }

    /// replaces a track with the same id or appends it
    pub fn upsert(&mut self, track: RemoteTrack) {
        match self.tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => *existing = track,
            None => self.tracks.push(track),
        }
    }

    /// returns true if anything was removed
    pub fn remove_kind(&mut self, kind: TrackKind) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.kind != kind);
        before != self.tracks.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn track(id: &str, kind: TrackKind) -> RemoteTrack {
        RemoteTrack::new(id, kind, Arc::new(()))
    }

    #[test]
    fn remote_stream_upsert_replaces_by_id() {
        let mut stream = RemoteStream::new("s");
        stream.upsert(track("a", TrackKind::Audio));
        stream.upsert(track("a", TrackKind::Audio));
        stream.upsert(track("v", TrackKind::ScreenVideo));
        assert_eq!(stream.tracks.len(), 2);
        assert!(stream.has_kind(TrackKind::ScreenVideo));

        assert!(stream.remove_kind(TrackKind::ScreenVideo));
        assert!(!stream.remove_kind(TrackKind::ScreenVideo));
        assert_eq!(stream.tracks.len(), 1);
    }
}
