//! Submitted jobs and their client-side status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::GenerationRequest;
use crate::types::Timestamp;

/// Opaque job identifier issued by the backend at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for compact log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Client-side view of a job's lifecycle.
///
/// `Queued -> Running -> {Succeeded, Failed}`, and any non-terminal state
/// can move to `TimedOut` when the client stops waiting. `TimedOut` says
/// nothing about the backend, which may still finish the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job accepted by the backend.
///
/// Holds only what is fixed at submission. Live status belongs to the
/// completion tracker that follows the job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub submitted_at: Timestamp,
    pub request: GenerationRequest,
}

impl Job {
    pub fn submitted(id: JobId, submitted_at: Timestamp, request: GenerationRequest) -> Self {
        Self {
            id,
            submitted_at,
            request,
        }
    }
}
