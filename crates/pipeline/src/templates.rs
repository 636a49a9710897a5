//! Loading graph templates, one per mode.

use std::path::{Path, PathBuf};

use vidgen_core::graph::GraphTemplate;
use vidgen_core::mode::GenerationMode;

use crate::error::GenerationError;

const BUILTIN_T2V: &str = include_str!("../../../workflows/t2v.json");
const BUILTIN_I2V: &str = include_str!("../../../workflows/i2v.json");
const BUILTIN_I2I: &str = include_str!("../../../workflows/i2i.json");

/// Source of `<mode>.json` templates.
///
/// A directory override is consulted first; a mode with no file there
/// falls back to the template compiled into the binary.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    dir: Option<PathBuf>,
}

impl TemplateStore {
    pub fn builtin() -> Self {
        Self { dir: None }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Load a fresh copy of the template for `mode`.
    pub async fn load(&self, mode: GenerationMode) -> Result<GraphTemplate, GenerationError> {
        let name = format!("{mode}.json");

        if let Some(dir) = &self.dir {
            let path = dir.join(&name);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    tracing::debug!(path = %path.display(), "Loaded graph template");
                    return Ok(GraphTemplate::from_json(name, &text)?);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(
                        path = %path.display(),
                        "No template file, using built-in",
                    );
                }
                Err(e) => {
                    return Err(GenerationError::Validation {
                        field: "template".into(),
                        message: format!("cannot read {}: {e}", path.display()),
                    })
                }
            }
        }

        Ok(GraphTemplate::from_json(name, builtin_text(mode))?)
    }
}

fn builtin_text(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::T2v => BUILTIN_T2V,
        GenerationMode::I2v => BUILTIN_I2V,
        GenerationMode::I2i => BUILTIN_I2I,
    }
}
