//! Compiled-in quality preset catalog.
//!
//! Maps a quality label ("240p" .. "4K") to the encoding parameters used for
//! that rendition. The table is immutable, so lookups are safe from any
//! thread without synchronisation.

use serde::Serialize;
use std::fmt;

use crate::{Error, Result};

/// x264 speed/quality tradeoff, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedProfile {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl SpeedProfile {
    /// The value passed to ffmpeg's `-preset` flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }
}

impl fmt::Display for SpeedProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding parameters for one quality tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityPreset {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    /// Constant rate factor, 0-51; lower means higher fidelity.
    pub crf: u8,
    pub speed: SpeedProfile,
}

/// Largest CRF value libx264 accepts.
pub const MAX_CRF: u8 = 51;

const fn preset(
    label: &'static str,
    width: u32,
    height: u32,
    video_bitrate_kbps: u32,
    audio_bitrate_kbps: u32,
    crf: u8,
) -> QualityPreset {
    QualityPreset {
        label,
        width,
        height,
        video_bitrate_kbps,
        audio_bitrate_kbps,
        crf,
        speed: SpeedProfile::Medium,
    }
}

/// The catalog, ordered from the lowest to the highest tier.
pub static CATALOG: &[QualityPreset] = &[
    preset("240p", 426, 240, 400, 64, 28),
    preset("360p", 640, 360, 800, 96, 27),
    preset("480p", 854, 480, 1500, 128, 26),
    preset("720p", 1280, 720, 3000, 128, 24),
    preset("1080p", 1920, 1080, 6000, 192, 22),
    preset("1440p", 2560, 1440, 10000, 256, 20),
    preset("4K", 3840, 2160, 20000, 320, 18),
];

/// Look up a preset by its label.
///
/// Labels are matched exactly; "4k" is not "4K".
pub fn resolve(label: &str) -> Result<&'static QualityPreset> {
    CATALOG
        .iter()
        .find(|p| p.label == label)
        .ok_or_else(|| Error::not_found("quality preset", label))
}

/// All catalog entries, lowest tier first.
pub fn all() -> &'static [QualityPreset] {
    CATALOG
}

/// Whether `label` names a catalog entry.
pub fn is_known(label: &str) -> bool {
    resolve(label).is_ok()
}
