//! End-to-end generation flow.
//!
//! ```text
//! params ─> resolve ─> template ─> [upload] ─> bind ─> submit ─> audit
//!                                                        │
//!                                           queue mode <─┴─> track ─> retrieve
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vidgen_core::binder::{bind, check_template};
use vidgen_core::graph::BoundGraph;
use vidgen_core::job::JobId;
use vidgen_core::request::{GenerationParams, GenerationRequest};

use crate::audit::AuditSink;
use crate::backend::{ArtifactFetcher, Backend};
use crate::clock::{Clock, SystemClock};
use crate::error::GenerationError;
use crate::retriever::save_outputs;
use crate::submitter::{submit_job, SubmittedJob};
use crate::templates::TemplateStore;
use crate::tracker::{wait_for_completion, CompletionTracker};
use crate::uploader::upload_asset;

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A request bound into its graph, ready to submit.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub request: GenerationRequest,
    pub graph: BoundGraph,
    /// Backend reference of the uploaded input image.
    pub image_ref: Option<String>,
}

/// How a run ended successfully.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Queue mode: submitted and not waited on.
    Queued { job_id: JobId },
    Completed { job_id: JobId, files: Vec<PathBuf> },
}

impl Outcome {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Queued { job_id } | Self::Completed { job_id, .. } => job_id,
        }
    }
}

/// Runs generation requests against one backend.
#[derive(Clone)]
pub struct JobClient {
    backend: Arc<dyn Backend>,
    fetcher: Arc<dyn ArtifactFetcher>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    templates: TemplateStore,
    output_dir: PathBuf,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl JobClient {
    pub fn new(
        backend: Arc<dyn Backend>,
        fetcher: Arc<dyn ArtifactFetcher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            backend,
            fetcher,
            audit,
            clock: Arc::new(SystemClock),
            templates: TemplateStore::builtin(),
            output_dir: PathBuf::from("."),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_templates(mut self, templates: TemplateStore) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Token that stops any wait in progress when cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Validate the request, load and check its template, upload the
    /// input image if the mode needs one, and bind.
    ///
    /// A template that cannot serve the mode is reported before anything
    /// is uploaded.
    pub async fn prepare(&self, request: GenerationRequest) -> Result<PreparedJob, GenerationError> {
        let template = self.templates.load(request.mode).await?;
        check_template(request.mode, &template)?;

        let image_ref = match (&request.image_path, request.mode.requires_image()) {
            (Some(path), true) => Some(upload_asset(self.backend.as_ref(), path).await?),
            _ => None,
        };

        let graph = bind(&request, &template, image_ref.as_deref())?;
        tracing::debug!(
            mode = %request.mode,
            template = template.name(),
            nodes = template.node_count(),
            "Graph bound",
        );
        Ok(PreparedJob {
            request,
            graph,
            image_ref,
        })
    }

    pub async fn submit(&self, prepared: &PreparedJob) -> Result<SubmittedJob, GenerationError> {
        submit_job(
            self.backend.as_ref(),
            self.audit.as_ref(),
            self.clock.as_ref(),
            &prepared.graph,
            &prepared.request,
        )
        .await
    }

    /// Wait for a submitted job and save its outputs.
    pub async fn complete(&self, submitted: &SubmittedJob) -> Result<Vec<PathBuf>, GenerationError> {
        let request = &submitted.job.request;
        let mut tracker = CompletionTracker::new(
            submitted.job.id.clone(),
            submitted.submitted,
            Duration::from_secs(request.timeout_seconds),
        );
        self.track_and_retrieve(&mut tracker, &request.output_prefix)
            .await
    }

    /// Pick up a job submitted earlier, by id. The timeout counts from
    /// now.
    pub async fn resume(
        &self,
        job_id: JobId,
        output_prefix: &str,
        timeout: Duration,
    ) -> Result<Vec<PathBuf>, GenerationError> {
        tracing::info!(job_id = %job_id, "Resuming job");
        let mut tracker = CompletionTracker::new(job_id, self.clock.now(), timeout);
        self.track_and_retrieve(&mut tracker, output_prefix).await
    }

    /// Resolve `params` and run the whole flow. With `queue_only` the
    /// job id is returned as soon as the backend accepts the job.
    pub async fn run(
        &self,
        params: GenerationParams,
        queue_only: bool,
    ) -> Result<Outcome, GenerationError> {
        let request = params.resolve()?;
        let prepared = self.prepare(request).await?;
        let submitted = self.submit(&prepared).await?;
        let job_id = submitted.job.id.clone();

        if queue_only {
            return Ok(Outcome::Queued { job_id });
        }

        let files = self.complete(&submitted).await?;
        Ok(Outcome::Completed { job_id, files })
    }

    async fn track_and_retrieve(
        &self,
        tracker: &mut CompletionTracker,
        output_prefix: &str,
    ) -> Result<Vec<PathBuf>, GenerationError> {
        let outputs = wait_for_completion(
            self.backend.as_ref(),
            self.clock.as_ref(),
            tracker,
            self.poll_interval,
            &self.cancel,
        )
        .await?;

        save_outputs(
            self.fetcher.as_ref(),
            tracker.job_id(),
            &outputs,
            &self.output_dir,
            output_prefix,
        )
        .await
    }
}
