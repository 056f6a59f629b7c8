use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Resolution tier for screen capture
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenQuality {
    #[display(fmt = "auto")]
    #[serde(rename = "auto")]
    Auto,
    #[display(fmt = "720")]
    #[serde(rename = "720")]
    Hd720,
    #[default]
    #[display(fmt = "1080")]
    #[serde(rename = "1080")]
    Hd1080,
    #[display(fmt = "1440")]
    #[serde(rename = "1440")]
    Qhd1440,
}

impl ScreenQuality {
    /// (width, height), or None when the tier leaves resolution up to the capturer
    pub fn resolution(&self) -> Option<(u32, u32)> {
        match self {
            ScreenQuality::Auto => None,
            ScreenQuality::Hd720 => Some((1280, 720)),
            ScreenQuality::Hd1080 => Some((1920, 1080)),
            ScreenQuality::Qhd1440 => Some((2560, 1440)),
        }
    }
}

impl FromStr for ScreenQuality {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let quality = match s.trim().trim_end_matches('p') {
            "auto" | "Auto" => ScreenQuality::Auto,
            "720" => ScreenQuality::Hd720,
            "1080" => ScreenQuality::Hd1080,
            "1440" => ScreenQuality::Qhd1440,
            other => {
                return Err(Error::OtherWithContext(format!(
                    "invalid screen quality: {other}"
                )))
            }
        };
        Ok(quality)
    }
}

/// Quality tier plus frame rate used when capturing a screen.
/// a frame rate of 0 leaves the rate unconstrained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenProfile {
    pub quality: ScreenQuality,
    pub frame_rate: u32,
}

impl Default for ScreenProfile {
    fn default() -> Self {
        Self {
            quality: ScreenQuality::default(),
            frame_rate: 30,
        }
    }
}

/// `ideal` hints for a capture track. `None` fields are left to the capturer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackConstraints {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ideal_frame_rate: Option<u32>,
    pub max_frame_rate: Option<u32>,
}

impl TrackConstraints {
    pub fn is_empty(&self) -> bool {
        *self == TrackConstraints::default()
    }
}

impl ScreenProfile {
    pub fn new(quality: ScreenQuality, frame_rate: u32) -> Self {
        Self {
            quality,
            frame_rate,
        }
    }

    pub fn constraints(&self) -> TrackConstraints {
        let mut constraints = TrackConstraints::default();
        if let Some((width, height)) = self.quality.resolution() {
            constraints.width = Some(width);
            constraints.height = Some(height);
        }
        if self.frame_rate > 0 {
            constraints.ideal_frame_rate = Some(self.frame_rate);
            constraints.max_frame_rate = Some(self.frame_rate);
        }
        constraints
    }

    /// ex: "1080p • 30 FPS"
    pub fn label(&self) -> String {
        let quality = match self.quality {
            ScreenQuality::Auto => "Auto".to_string(),
            other => format!("{other}p"),
        };
        format!("{quality} • {} FPS", self.frame_rate)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn auto_tier_has_no_resolution_constraint() {
        let profile = ScreenProfile::new(ScreenQuality::Auto, 60);
        let constraints = profile.constraints();
        assert_eq!(constraints.width, None);
        assert_eq!(constraints.height, None);
        assert_eq!(constraints.ideal_frame_rate, Some(60));
        assert_eq!(constraints.max_frame_rate, Some(60));
    }

    #[test]
    fn unconstrained_auto_profile_is_empty() {
        let profile = ScreenProfile::new(ScreenQuality::Auto, 0);
        assert!(profile.constraints().is_empty());
    }

    #[test]
    fn tiers_map_to_resolutions() {
        assert_eq!(ScreenQuality::Hd720.resolution(), Some((1280, 720)));
        assert_eq!(ScreenQuality::Hd1080.resolution(), Some((1920, 1080)));
        assert_eq!(ScreenQuality::Qhd1440.resolution(), Some((2560, 1440)));
    }

    #[test]
    fn labels() {
        assert_eq!(ScreenProfile::default().label(), "1080p • 30 FPS");
        assert_eq!(
            ScreenProfile::new(ScreenQuality::Auto, 15).label(),
            "Auto • 15 FPS"
        );
    }

    #[test]
    fn quality_parses_with_or_without_suffix() -> anyhow::Result<()> {
        assert_eq!("720p".parse::<ScreenQuality>()?, ScreenQuality::Hd720);
        assert_eq!("1440".parse::<ScreenQuality>()?, ScreenQuality::Qhd1440);
        assert_eq!("auto".parse::<ScreenQuality>()?, ScreenQuality::Auto);
        assert!("4k".parse::<ScreenQuality>().is_err());
        Ok(())
    }

    #[test]
    fn quality_serializes_as_tier_string() -> anyhow::Result<()> {
        let json = serde_json::to_string(&ScreenProfile::default())?;
        assert_eq!(json, r#"{"quality":"1080","frame_rate":30}"#);
        Ok(())
    }
}
