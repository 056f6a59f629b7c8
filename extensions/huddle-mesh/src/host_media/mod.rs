//! CPAL is used to find audio input devices. cpal has a stream which isn't Send or Sync, so the
//! selected device is remembered by name and resolved again whenever a track is acquired.
//!
//! Tracks handed out here are `WrtcLocalTrack`s. The embedding application feeds them RTP
//! packets; `microphone_track` and `screen_track` expose the live ones.

use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use huddle::{
    error::Error,
    media::{CaptureDevices, LocalTrack, TrackKind},
    voice::profile::ScreenProfile,
};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::simple_webrtc::{opus_capability, vp8_capability, WrtcLocalTrack};

pub struct HostCapture {
    stream_id: String,
    /// None means the host default
    selected_microphone: RwLock<Option<String>>,
    screen_capture: bool,
    microphone: RwLock<Option<Arc<WrtcLocalTrack>>>,
    screen: RwLock<Option<Arc<WrtcLocalTrack>>>,
}

impl Default for HostCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCapture {
    pub fn new() -> Self {
        Self {
            stream_id: Uuid::new_v4().to_string(),
            selected_microphone: RwLock::new(None),
            screen_capture: false,
            microphone: RwLock::new(None),
            screen: RwLock::new(None),
        }
    }

    /// allows `acquire_screen`. the application is then responsible for producing the frames
    pub fn with_screen_capture(mut self, enabled: bool) -> Self {
        self.screen_capture = enabled;
        self
    }

    pub fn microphone_track(&self) -> Option<Arc<WrtcLocalTrack>> {
        self.microphone
            .read()
            .as_ref()
            .filter(|t| !t.is_stopped())
            .cloned()
    }

    pub fn screen_track(&self) -> Option<Arc<WrtcLocalTrack>> {
        self.screen
            .read()
            .as_ref()
            .filter(|t| !t.is_stopped())
            .cloned()
    }

    pub fn selected_microphone(&self) -> Option<String> {
        self.selected_microphone.read().clone()
    }

    fn input_device(&self) -> Result<Option<cpal::Device>, Error> {
        let host = cpal::default_host();
        let selected = self.selected_microphone.read().clone();
        let name = match selected {
            Some(r) => r,
            None => return Ok(host.default_input_device()),
        };
        let devices = host
            .input_devices()
            .map_err(|e| Error::AudioHostError(e.to_string()))?;
        Ok(devices.into_iter().find(|d| d.name().ok().as_deref() == Some(name.as_str())))
    }
}

#[async_trait]
impl CaptureDevices for HostCapture {
    async fn acquire_microphone(&self) -> Result<Arc<dyn LocalTrack>, Error> {
        let device = self.input_device()?.ok_or(Error::MicrophoneMissing)?;
        let name = device.name().unwrap_or(String::from("unknown device"));
        log::debug!("acquiring microphone {name}");

        let track = Arc::new(WrtcLocalTrack::new(
            TrackKind::Audio,
            opus_capability(),
            &self.stream_id,
        ));
        if let Some(previous) = self.microphone.write().replace(track.clone()) {
            previous.stop();
        }
        Ok(track)
    }

    async fn acquire_screen(&self, profile: &ScreenProfile) -> Result<Arc<dyn LocalTrack>, Error> {
        if !self.screen_capture {
            return Err(Error::CaptureUnsupported(
                "screen capture is not enabled on this host".into(),
            ));
        }
        let track = Arc::new(WrtcLocalTrack::new(
            TrackKind::ScreenVideo,
            vp8_capability(),
            &self.stream_id,
        ));
        track.apply_profile(profile).await?;
        if let Some(previous) = self.screen.write().replace(track.clone()) {
            previous.stop();
        }
        Ok(track)
    }

    fn available_microphones(&self) -> Result<Vec<String>, Error> {
        let device_iter = cpal::default_host()
            .input_devices()
            .map_err(|e| Error::AudioHostError(e.to_string()))?;
        Ok(device_iter
            .map(|device| device.name().unwrap_or(String::from("unknown device")))
            .collect())
    }

    fn select_microphone(&self, device_name: &str) -> Result<(), Error> {
        if device_name == "default" {
            self.selected_microphone.write().take();
            return Ok(());
        }
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| Error::AudioHostError(format!("could not get input devices: {e}")))?;
        for device in devices {
            if let Ok(name) = device.name() {
                if name == device_name {
                    self.selected_microphone.write().replace(name);
                    return Ok(());
                }
            }
        }

        Err(Error::AudioDeviceNotFound)
    }
}
