//! Submitting bound graphs and recording them in the audit log.

use std::time::Instant;

use chrono::Utc;
use vidgen_core::audit::AuditRecord;
use vidgen_core::graph::BoundGraph;
use vidgen_core::job::Job;
use vidgen_core::request::GenerationRequest;

use crate::audit::AuditSink;
use crate::backend::Backend;
use crate::clock::Clock;
use crate::error::GenerationError;

/// A job the backend accepted.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub job: Job,
    /// Monotonic submission instant; completion timeouts count from here.
    pub submitted: Instant,
}

/// Queue `graph` on the backend and append an audit record.
///
/// A failing audit sink is logged and otherwise ignored: the job is
/// already queued at that point.
pub async fn submit_job(
    backend: &dyn Backend,
    audit: &dyn AuditSink,
    clock: &dyn Clock,
    graph: &BoundGraph,
    request: &GenerationRequest,
) -> Result<SubmittedJob, GenerationError> {
    let job_id = match backend.submit(graph.document()).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(mode = %request.mode, error = %e, "Submission failed");
            return Err(e);
        }
    };
    let submitted = clock.now();
    let submitted_at = Utc::now();

    tracing::info!(job_id = %job_id, mode = %request.mode, "Job submitted");

    let record = AuditRecord::new(submitted_at, &job_id, request);
    if let Err(e) = audit.append(&record).await {
        tracing::warn!(job_id = %job_id, error = %e, "Could not write audit record");
    }

    Ok(SubmittedJob {
        job: Job::submitted(job_id, submitted_at, request.clone()),
        submitted,
    })
}
