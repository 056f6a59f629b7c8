//! Full-mesh voice rooms.
//!
//! `MeshVoice` implements `huddle::voice::VoiceRoom` on top of three collaborators: a `Relay`
//! carrying signals, a `PeerConnector` creating one transport connection per remote participant
//! and a `CaptureDevices` provider for microphone and screen tracks. `simple_webrtc`,
//! `host_media` and `relay` provide the webrtc-rs, cpal and WebSocket versions of those.

pub mod config;
pub mod host_media;
mod mesh_impl;
pub mod relay;
pub mod simple_webrtc;

pub use mesh_impl::MeshVoice;
