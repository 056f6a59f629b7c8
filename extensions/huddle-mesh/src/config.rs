use std::time::Duration;

use huddle::voice::profile::ScreenProfile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// STUN/TURN urls handed to every peer connection
    pub ice_servers: Vec<String>,
    /// websocket endpoint of the presence relay
    pub relay_url: Option<String>,
    /// used for the next screen share
    pub screen_profile: ScreenProfile,
    /// an offer without an answer after this long no longer blocks renegotiation
    #[serde(with = "duration_secs")]
    pub negotiation_timeout: Duration,
    /// participants already present re-broadcast their state when someone joins
    pub announce_state_on_join: bool,
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
            relay_url: None,
            screen_profile: ScreenProfile::default(),
            negotiation_timeout: Duration::from_secs(15),
            announce_state_on_join: true,
            event_channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Default configuration for local development
    pub fn development() -> Config {
        Config {
            relay_url: Some("ws://127.0.0.1:3000/ws".into()),
            ..Default::default()
        }
    }

    /// Test configuration. No ICE servers and short timeouts
    pub fn testing() -> Config {
        Config {
            ice_servers: vec![],
            negotiation_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    pub fn ice_servers_mut(&mut self) -> &mut Vec<String> {
        &mut self.ice_servers
    }

    pub fn relay_url_mut(&mut self) -> &mut Option<String> {
        &mut self.relay_url
    }

    pub fn screen_profile_mut(&mut self) -> &mut ScreenProfile {
        &mut self.screen_profile
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
