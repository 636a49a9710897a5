//! The seam between the pipeline and a generation backend.
//!
//! [`Backend`] covers the queue side (submit, upload, status) and
//! [`ArtifactFetcher`] the output side. Both are implemented for
//! [`ComfyUIApi`]; tests substitute in-memory fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use vidgen_comfyui::models::OutputFile;
use vidgen_comfyui::{ComfyUIApi, ComfyUIApiError};
use vidgen_core::job::JobId;

use crate::error::GenerationError;

/// What the backend currently knows about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendStatus {
    /// Neither in the queue nor in history.
    NotFound,
    Queued {
        /// Zero-based position among pending jobs, if known.
        position: Option<usize>,
        running: usize,
        pending: usize,
    },
    Running { pending: usize },
    Succeeded { outputs: Vec<OutputFile> },
    Failed { detail: String, payload: Value },
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Queue a bound graph. Returns the backend-issued job id.
    async fn submit(&self, graph: &Value) -> Result<JobId, GenerationError>;

    /// Upload an image and return the reference the graph should carry.
    async fn upload_image(
        &self,
        path: &Path,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<String, GenerationError>;

    async fn status(&self, job_id: &JobId) -> Result<BackendStatus, GenerationError>;
}

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Copy `file` into `dest`, returning the number of bytes written.
    async fn fetch(&self, file: &OutputFile, dest: &mut File) -> std::io::Result<u64>;
}

// ---------------------------------------------------------------------------
// ComfyUI
// ---------------------------------------------------------------------------

#[async_trait]
impl Backend for ComfyUIApi {
    async fn submit(&self, graph: &Value) -> Result<JobId, GenerationError> {
        match self.submit_workflow(graph).await {
            Ok(resp) => Ok(JobId::new(resp.prompt_id)),
            Err(ComfyUIApiError::PromptRejected { error, payload }) => {
                Err(GenerationError::SubmissionRejected {
                    message: error.summary(),
                    payload,
                })
            }
            Err(e) if e.is_transport() => Err(GenerationError::unreachable(&e)),
            Err(ComfyUIApiError::ApiError { status, body }) => {
                Err(GenerationError::SubmissionRejected {
                    message: format!("HTTP {status}: {body}"),
                    payload: serde_json::from_str(&body).unwrap_or(Value::String(body)),
                })
            }
            Err(e) => Err(GenerationError::SubmissionRejected {
                message: e.to_string(),
                payload: Value::Null,
            }),
        }
    }

    async fn upload_image(
        &self,
        path: &Path,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<String, GenerationError> {
        match ComfyUIApi::upload_image(self, file_name, mime_type, data).await {
            Ok(resp) => Ok(resp.reference()),
            Err(ComfyUIApiError::ApiError {
                status: 400 | 415,
                body,
            }) => Err(GenerationError::UnsupportedFormat {
                path: path.to_path_buf(),
                detail: body,
            }),
            Err(e) => Err(GenerationError::UploadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    async fn status(&self, job_id: &JobId) -> Result<BackendStatus, GenerationError> {
        let history = self
            .get_history(job_id.as_str())
            .await
            .map_err(|e| GenerationError::unreachable(&e))?;

        if let Some(entry) = history {
            if entry.is_error() {
                return Ok(BackendStatus::Failed {
                    detail: entry.error_detail(),
                    payload: entry.error_payload(),
                });
            }
            if entry.is_success() {
                return Ok(BackendStatus::Succeeded {
                    outputs: entry.output_files(),
                });
            }
        }

        let queue = self
            .get_queue()
            .await
            .map_err(|e| GenerationError::unreachable(&e))?;
        let (running, pending) = (queue.running.len(), queue.pending.len());

        if queue.is_running(job_id.as_str()) {
            Ok(BackendStatus::Running { pending })
        } else if queue.is_pending(job_id.as_str()) {
            Ok(BackendStatus::Queued {
                position: queue.pending_position(job_id.as_str()),
                running,
                pending,
            })
        } else {
            Ok(BackendStatus::NotFound)
        }
    }
}

#[async_trait]
impl ArtifactFetcher for ComfyUIApi {
    async fn fetch(&self, file: &OutputFile, dest: &mut File) -> std::io::Result<u64> {
        self.download_output(file, dest)
            .await
            .map_err(|e| match e {
                ComfyUIApiError::Io(io) => io,
                other => std::io::Error::other(other.to_string()),
            })
    }
}

// ---------------------------------------------------------------------------
// Shared output directory
// ---------------------------------------------------------------------------

/// Reads artifacts straight from the backend's output directory, for a
/// backend running on the same host.
#[derive(Debug, Clone)]
pub struct LocalOutputDir {
    root: PathBuf,
}

impl LocalOutputDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, file: &OutputFile) -> PathBuf {
        self.root.join(file.relative_path())
    }
}

#[async_trait]
impl ArtifactFetcher for LocalOutputDir {
    async fn fetch(&self, file: &OutputFile, dest: &mut File) -> std::io::Result<u64> {
        let mut source = File::open(self.path_of(file)).await?;
        let copied = tokio::io::copy(&mut source, &mut *dest).await?;
        dest.flush().await?;
        Ok(copied)
    }
}
