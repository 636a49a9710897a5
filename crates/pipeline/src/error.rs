//! Error taxonomy for a generation run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use vidgen_comfyui::ComfyUIApiError;
use vidgen_core::job::JobId;
use vidgen_core::CoreError;

/// Coarse classification of a [`GenerationError`], used to pick an exit
/// code and decide whether a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    UnsupportedFormat,
    UploadFailed,
    SubmissionRejected,
    Unreachable,
    Failed,
    TimedOut,
    NoOutput,
    RetrievalFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::UnsupportedFormat => "unsupported_format",
            Self::UploadFailed => "upload_failed",
            Self::SubmissionRejected => "submission_rejected",
            Self::Unreachable => "unreachable",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::NoOutput => "no_output",
            Self::RetrievalFailed => "retrieval_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The request or the template failed validation. Never retried.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Input file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Unsupported image format for {}: {detail}", .path.display())]
    UnsupportedFormat { path: PathBuf, detail: String },

    #[error("Upload of {} failed: {message}", .path.display())]
    UploadFailed { path: PathBuf, message: String },

    /// The backend refused the graph. `payload` is its response verbatim.
    #[error("Backend rejected the workflow: {message}")]
    SubmissionRejected { message: String, payload: Value },

    /// The backend could not be contacted. Retrying is the caller's call.
    #[error("Backend unreachable: {message}")]
    Unreachable { message: String },

    #[error("Job {job_id} failed: {detail}")]
    Failed {
        job_id: JobId,
        detail: String,
        payload: Value,
    },

    /// The client stopped waiting. The backend job keeps running.
    #[error("Job {job_id} timed out after {}s", .elapsed.as_secs())]
    TimedOut { job_id: JobId, elapsed: Duration },

    #[error("Job {job_id} succeeded but produced no output files")]
    NoOutput { job_id: JobId },

    #[error("Could not retrieve output of job {job_id}: {message}")]
    RetrievalFailed { job_id: JobId, message: String },

    #[error("Stopped waiting for job {job_id}")]
    Cancelled { job_id: JobId },
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::UploadFailed { .. } => ErrorKind::UploadFailed,
            Self::SubmissionRejected { .. } => ErrorKind::SubmissionRejected,
            Self::Unreachable { .. } => ErrorKind::Unreachable,
            Self::Failed { .. } => ErrorKind::Failed,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::NoOutput { .. } => ErrorKind::NoOutput,
            Self::RetrievalFailed { .. } => ErrorKind::RetrievalFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Structured payload the backend attached to the failure, if any.
    pub fn backend_detail(&self) -> Option<&Value> {
        match self {
            Self::SubmissionRejected { payload, .. } | Self::Failed { payload, .. } => {
                Some(payload).filter(|p| !p.is_null())
            }
            _ => None,
        }
    }

    /// Job the error concerns, once one exists.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::Failed { job_id, .. }
            | Self::TimedOut { job_id, .. }
            | Self::NoOutput { job_id }
            | Self::RetrievalFailed { job_id, .. }
            | Self::Cancelled { job_id } => Some(job_id),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Unreachable
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation => 2,
            ErrorKind::NotFound | ErrorKind::UnsupportedFormat | ErrorKind::UploadFailed => 3,
            ErrorKind::SubmissionRejected => 4,
            ErrorKind::Unreachable => 5,
            ErrorKind::Failed => 6,
            ErrorKind::TimedOut => 7,
            ErrorKind::NoOutput => 8,
            ErrorKind::RetrievalFailed => 9,
            ErrorKind::Cancelled => 130,
        }
    }

    pub(crate) fn unreachable(err: &ComfyUIApiError) -> Self {
        Self::Unreachable {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for GenerationError {
    fn from(err: CoreError) -> Self {
        let field = match &err {
            CoreError::Validation { field, message } => {
                return Self::Validation {
                    field: field.to_string(),
                    message: message.clone(),
                }
            }
            CoreError::UnknownMode(_) => "mode",
            CoreError::InvalidTemplate(_)
            | CoreError::MissingLocation { .. }
            | CoreError::UnresolvedPlaceholders(_) => "template",
        };
        Self::Validation {
            field: field.to_string(),
            message: err.to_string(),
        }
    }
}
