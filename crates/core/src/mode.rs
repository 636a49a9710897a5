//! Generation modes and their parameter defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Negative prompts
// ---------------------------------------------------------------------------

/// Quality filter applied to text-to-video requests.
pub const T2V_NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, deformed, static, frozen, \
flickering, morphing, ugly, bad anatomy, extra limbs, missing limbs, watermark, text, logo";

/// Quality filter applied to image-to-video requests. Adds identity-drift
/// terms on top of the text-to-video filter.
pub const I2V_NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, deformed, static, frozen, \
flickering, morphing, ugly, bad anatomy, extra limbs, missing limbs, watermark, text, logo, \
different person, changing face";

/// Quality filter applied to image-to-image requests.
pub const I2I_NEGATIVE_PROMPT: &str = "ugly, deformed, noisy, blurry, low quality, cartoon, anime, \
3d render, bad anatomy, bad proportions, extra limbs, cloned face, disfigured, gross proportions, \
malformed limbs, missing arms, missing legs, mutated hands, poorly drawn face, poorly drawn hands";

/// Frame rate the video graphs encode at. Only used for display.
pub const VIDEO_FRAME_RATE: u32 = 16;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// What the backend is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Text-to-video.
    T2v,
    /// Image-to-video.
    I2v,
    /// Identity-preserving image-to-image.
    I2i,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 3] = [Self::T2v, Self::I2v, Self::I2i];

    /// Resolve the effective mode for a request.
    ///
    /// An explicit mode always wins. Otherwise the presence of an input
    /// image selects image-to-video and its absence text-to-video.
    pub fn resolve(explicit: Option<GenerationMode>, has_image: bool) -> GenerationMode {
        match explicit {
            Some(mode) => mode,
            None if has_image => Self::I2v,
            None => Self::T2v,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::T2v => "t2v",
            Self::I2v => "i2v",
            Self::I2i => "i2i",
        }
    }

    /// Human-readable name used in banners.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::T2v => "Text-to-Video (T2V)",
            Self::I2v => "Image-to-Video (I2V)",
            Self::I2i => "Image-to-Image (I2I)",
        }
    }

    pub fn requires_image(self) -> bool {
        matches!(self, Self::I2v | Self::I2i)
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::T2v | Self::I2v)
    }

    pub fn defaults(self) -> ModeDefaults {
        match self {
            Self::T2v => ModeDefaults {
                width: 480,
                height: 320,
                frame_count: Some(100),
                step_count: 8,
                guidance_scale: 1.0,
                negative_prompt: T2V_NEGATIVE_PROMPT,
            },
            Self::I2v => ModeDefaults {
                width: 480,
                height: 320,
                frame_count: Some(100),
                step_count: 20,
                guidance_scale: 1.0,
                negative_prompt: I2V_NEGATIVE_PROMPT,
            },
            Self::I2i => ModeDefaults {
                width: 1024,
                height: 1024,
                frame_count: None,
                step_count: 25,
                guidance_scale: 7.0,
                negative_prompt: I2I_NEGATIVE_PROMPT,
            },
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "t2v" => Ok(Self::T2v),
            "i2v" => Ok(Self::I2v),
            "i2i" => Ok(Self::I2i),
            other => Err(CoreError::UnknownMode(other.to_string())),
        }
    }
}

/// Values used for any parameter the caller leaves unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeDefaults {
    pub width: u32,
    pub height: u32,
    /// `None` for image modes, which have no frame count.
    pub frame_count: Option<u32>,
    pub step_count: u32,
    pub guidance_scale: f64,
    pub negative_prompt: &'static str,
}
