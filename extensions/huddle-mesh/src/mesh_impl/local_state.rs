use std::sync::Arc;

use huddle::{
    media::LocalTrack,
    voice::{participant::ParticipantState, profile::ScreenProfile, LocalState},
};

/// The local participant's flags and the tracks they gate.
/// mute and deafen survive leaving a room; the tracks do not
pub struct LocalCallState {
    muted: bool,
    deafened: bool,
    screen_profile: ScreenProfile,
    microphone: Option<Arc<dyn LocalTrack>>,
    screen: Option<Arc<dyn LocalTrack>>,
}

impl LocalCallState {
    pub fn new(screen_profile: ScreenProfile) -> Self {
        Self {
            muted: false,
            deafened: false,
            screen_profile,
            microphone: None,
            screen: None,
        }
    }

    pub fn audio_enabled(&self) -> bool {
        !self.muted && !self.deafened
    }

    fn gate_audio(&self) {
        if let Some(mic) = self.microphone.as_ref() {
            mic.set_enabled(self.audio_enabled());
        }
    }

    /// returns true if the flag changed
    pub fn set_muted(&mut self, muted: bool) -> bool {
        let changed = self.muted != muted;
        self.muted = muted;
        self.gate_audio();
        changed
    }

    /// returns true if the flag changed
    pub fn set_deafened(&mut self, deafened: bool) -> bool {
        let changed = self.deafened != deafened;
        self.deafened = deafened;
        self.gate_audio();
        changed
    }

    pub fn set_microphone(&mut self, track: Arc<dyn LocalTrack>) {
        self.microphone = Some(track);
        self.gate_audio();
    }

    pub fn microphone(&self) -> Option<&Arc<dyn LocalTrack>> {
        self.microphone.as_ref()
    }

    pub fn set_screen(&mut self, track: Arc<dyn LocalTrack>) {
        self.screen = Some(track);
    }

    pub fn screen(&self) -> Option<&Arc<dyn LocalTrack>> {
        self.screen.as_ref()
    }

    pub fn take_screen(&mut self) -> Option<Arc<dyn LocalTrack>> {
        self.screen.take()
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn screen_profile(&self) -> ScreenProfile {
        self.screen_profile
    }

    pub fn set_screen_profile(&mut self, profile: ScreenProfile) {
        self.screen_profile = profile;
    }

    /// every live track, microphone first
    pub fn tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.microphone
            .iter()
            .chain(self.screen.iter())
            .cloned()
            .collect()
    }

    /// stops and drops every track. flags are kept
    pub fn release(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if let Some(mic) = self.microphone.take() {
            mic.stop();
        }
    }

    pub fn participant_state(&self) -> ParticipantState {
        ParticipantState {
            muted: self.muted,
            deafened: self.deafened,
            screen_sharing: self.screen_sharing(),
        }
    }

    pub fn snapshot(&self) -> LocalState {
        LocalState {
            muted: self.muted,
            deafened: self.deafened,
            screen_sharing: self.screen_sharing(),
            screen_profile: self.screen_profile,
        }
    }
}
