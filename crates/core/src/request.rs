//! Caller parameters and their resolution into a complete request.
//!
//! [`GenerationParams`] mirrors what an operator types: almost every
//! field is optional. [`GenerationParams::resolve`] picks the mode,
//! fills mode defaults for anything left unset and validates the result
//! into a [`GenerationRequest`], which the binder consumes.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::CoreError;
use crate::mode::GenerationMode;

/// Output prefix used when the caller does not supply one.
pub const DEFAULT_OUTPUT_PREFIX: &str = "vidgen_output";

/// Client-side wait limit used when the caller does not supply one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Extensions stripped from a caller-supplied output prefix.
const STRIPPED_EXTENSIONS: &[&str] = &[".mp4", ".png"];

/// Raw, partially-specified generation parameters.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub mode: Option<GenerationMode>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_count: Option<u32>,
    pub step_count: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<u64>,
    pub image_path: Option<PathBuf>,
    pub output_prefix: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// A fully-resolved request. Every field the selected mode needs is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub mode: GenerationMode,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    /// Always `None` for [`GenerationMode::I2i`].
    pub frame_count: Option<u32>,
    pub step_count: u32,
    pub guidance_scale: f64,
    /// `None` leaves seed selection to the backend.
    pub seed: Option<u64>,
    pub image_path: Option<PathBuf>,
    pub output_prefix: String,
    pub timeout_seconds: u64,
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Resolve mode and defaults, then validate.
    pub fn resolve(self) -> Result<GenerationRequest, CoreError> {
        let mode = GenerationMode::resolve(self.mode, self.image_path.is_some());
        let defaults = mode.defaults();

        let prompt = self.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(CoreError::validation("prompt", "must not be empty"));
        }

        let image_path = match (mode.requires_image(), self.image_path) {
            (true, None) => {
                return Err(CoreError::validation(
                    "image_path",
                    format!("an input image is required for {} mode", mode.as_str().to_uppercase()),
                ));
            }
            (false, Some(path)) => {
                return Err(CoreError::validation(
                    "image_path",
                    format!("{} is not used in {} mode", path.display(), mode),
                ));
            }
            (_, image) => image,
        };

        let width = positive("width", self.width.unwrap_or(defaults.width))?;
        let height = positive("height", self.height.unwrap_or(defaults.height))?;
        let step_count = positive("step_count", self.step_count.unwrap_or(defaults.step_count))?;

        // Image modes have no frame dimension; a supplied value is ignored.
        let frame_count = match defaults.frame_count {
            Some(default) => Some(positive(
                "frame_count",
                self.frame_count.unwrap_or(default),
            )?),
            None => None,
        };

        let guidance_scale = self.guidance_scale.unwrap_or(defaults.guidance_scale);
        if !guidance_scale.is_finite() || guidance_scale <= 0.0 {
            return Err(CoreError::validation(
                "guidance_scale",
                format!("must be a positive number, got {guidance_scale}"),
            ));
        }

        let timeout_seconds = self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_seconds == 0 {
            return Err(CoreError::validation("timeout_seconds", "must be positive"));
        }

        let output_prefix = normalize_output_prefix(
            self.output_prefix.as_deref().unwrap_or(DEFAULT_OUTPUT_PREFIX),
        )?;

        let negative_prompt = self
            .negative_prompt
            .unwrap_or_else(|| defaults.negative_prompt.to_string());

        Ok(GenerationRequest {
            mode,
            prompt,
            negative_prompt,
            width,
            height,
            frame_count,
            step_count,
            guidance_scale,
            seed: self.seed,
            image_path,
            output_prefix,
            timeout_seconds,
        })
    }
}

impl GenerationRequest {
    /// The high/low-noise handover step for two-stage samplers.
    pub fn split_step(&self) -> u32 {
        self.step_count / 2
    }

    /// Approximate clip duration in seconds, for video modes.
    pub fn duration_secs(&self) -> Option<f64> {
        self.frame_count
            .map(|frames| frames as f64 / crate::mode::VIDEO_FRAME_RATE as f64)
    }
}

fn positive(field: &'static str, value: u32) -> Result<u32, CoreError> {
    if value == 0 {
        return Err(CoreError::validation(field, "must be a positive integer"));
    }
    Ok(value)
}

/// Reduce a prefix to a bare file-name stem.
///
/// The backend only accepts a filename prefix, so any directory part is
/// dropped and a trailing `.mp4` / `.png` is removed.
pub fn normalize_output_prefix(raw: &str) -> Result<String, CoreError> {
    let name = Path::new(raw.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let stem = STRIPPED_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(&name)
        .to_string();

    if stem.is_empty() {
        return Err(CoreError::validation(
            "output_prefix",
            format!("`{raw}` does not contain a usable file name"),
        ));
    }
    Ok(stem)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn t2v_defaults() {
        let req = GenerationParams::new("A woman dancing gracefully")
            .resolve()
            .unwrap();
        assert_eq!(req.mode, GenerationMode::T2v);
        assert_eq!((req.width, req.height), (480, 320));
        assert_eq!(req.frame_count, Some(100));
        assert_eq!(req.step_count, 8);
        assert_eq!(req.guidance_scale, 1.0);
        assert_eq!(req.seed, None);
        assert_eq!(req.output_prefix, DEFAULT_OUTPUT_PREFIX);
        assert_eq!(req.timeout_seconds, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn i2i_defaults_and_no_frames() {
        let req = GenerationParams {
            mode: Some(GenerationMode::I2i),
            image_path: Some("photo.png".into()),
            frame_count: Some(65),
            ..GenerationParams::new("nude, realistic photo")
        }
        .resolve()
        .unwrap();
        assert_eq!((req.width, req.height), (1024, 1024));
        assert_eq!(req.step_count, 25);
        assert_eq!(req.guidance_scale, 7.0);
        assert_eq!(req.frame_count, None);
    }

    #[test]
    fn image_selects_i2v() {
        let req = GenerationParams {
            image_path: Some("input.png".into()),
            ..GenerationParams::new("animate this person dancing")
        }
        .resolve()
        .unwrap();
        assert_eq!(req.mode, GenerationMode::I2v);
        assert_eq!(req.step_count, 20);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let req = GenerationParams {
            width: Some(720),
            height: Some(480),
            frame_count: Some(65),
            step_count: Some(12),
            guidance_scale: Some(2.5),
            seed: Some(7),
            negative_prompt: Some("none".into()),
            ..GenerationParams::new("A dancer performing")
        }
        .resolve()
        .unwrap();
        assert_eq!((req.width, req.height), (720, 480));
        assert_eq!(req.frame_count, Some(65));
        assert_eq!(req.step_count, 12);
        assert_eq!(req.guidance_scale, 2.5);
        assert_eq!(req.seed, Some(7));
        assert_eq!(req.negative_prompt, "none");
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let err = GenerationParams::new("   ").resolve().unwrap_err();
        assert_matches!(err, CoreError::Validation { field: "prompt", .. });
    }

    #[test]
    fn image_mode_without_image_is_rejected() {
        let err = GenerationParams {
            mode: Some(GenerationMode::I2i),
            ..GenerationParams::new("x")
        }
        .resolve()
        .unwrap_err();
        assert_matches!(err, CoreError::Validation { field: "image_path", .. });
    }

    #[test]
    fn image_in_t2v_is_rejected() {
        let err = GenerationParams {
            mode: Some(GenerationMode::T2v),
            image_path: Some("a.png".into()),
            ..GenerationParams::new("x")
        }
        .resolve()
        .unwrap_err();
        assert_matches!(err, CoreError::Validation { field: "image_path", .. });
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = GenerationParams {
            width: Some(0),
            ..GenerationParams::new("x")
        }
        .resolve()
        .unwrap_err();
        assert_matches!(err, CoreError::Validation { field: "width", .. });

        let err = GenerationParams {
            guidance_scale: Some(-1.0),
            ..GenerationParams::new("x")
        }
        .resolve()
        .unwrap_err();
        assert_matches!(err, CoreError::Validation { field: "guidance_scale", .. });

        let err = GenerationParams {
            timeout_seconds: Some(0),
            ..GenerationParams::new("x")
        }
        .resolve()
        .unwrap_err();
        assert_matches!(err, CoreError::Validation { field: "timeout_seconds", .. });
    }

    #[test]
    fn output_prefix_is_normalized() {
        assert_eq!(normalize_output_prefix("out/beach.mp4").unwrap(), "beach");
        assert_eq!(normalize_output_prefix("/tmp/shot.png").unwrap(), "shot");
        assert_eq!(normalize_output_prefix("video1").unwrap(), "video1");
        assert_eq!(normalize_output_prefix("clip.webm").unwrap(), "clip.webm");
        assert!(normalize_output_prefix("/").is_err());
        assert!(normalize_output_prefix(".mp4").is_err());
    }

    #[test]
    fn split_step_halves_steps() {
        let req = GenerationParams {
            image_path: Some("a.png".into()),
            step_count: Some(21),
            ..GenerationParams::new("x")
        }
        .resolve()
        .unwrap();
        assert_eq!(req.split_step(), 10);
        assert_eq!(req.duration_secs(), Some(100.0 / 16.0));
    }
}
