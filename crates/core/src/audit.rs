//! Audit record format for the submission log.
//!
//! One JSON object per line. Records are historical: they describe what
//! was submitted, not how the job ended.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::mode::GenerationMode;
use crate::request::GenerationRequest;
use crate::types::Timestamp;

/// A single submission, as written to the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: Timestamp,
    pub mode: GenerationMode,
    pub job_id: JobId,
    pub output_prefix: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u32>,
    pub step_count: u32,
    pub guidance_scale: f64,
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

impl AuditRecord {
    pub fn new(timestamp: Timestamp, job_id: &JobId, request: &GenerationRequest) -> Self {
        Self {
            timestamp,
            mode: request.mode,
            job_id: job_id.clone(),
            output_prefix: request.output_prefix.clone(),
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            width: request.width,
            height: request.height,
            frame_count: request.frame_count,
            step_count: request.step_count,
            guidance_scale: request.guidance_scale,
            seed: request.seed,
            image_path: request.image_path.clone(),
        }
    }

    /// Serialize to a single newline-terminated line.
    ///
    /// JSON string escaping guarantees prompt text cannot introduce a
    /// line break into the record.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
