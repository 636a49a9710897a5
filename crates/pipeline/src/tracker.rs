//! Completion tracking for a submitted job.
//!
//! [`CompletionTracker`] is a pure state machine: it is fed one backend
//! observation at a time and decides whether the job has reached a
//! terminal state. [`wait_for_completion`] drives it with a fixed poll
//! interval over an injected [`Clock`].
//!
//! ```text
//! Queued ──> Running ──> Succeeded
//!   │           │
//!   │           └──────> Failed
//!   └──(any)──> TimedOut   (elapsed since submission >= timeout)
//! ```

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use vidgen_comfyui::models::OutputFile;
use vidgen_core::job::{JobId, JobStatus};

use crate::backend::{Backend, BackendStatus};
use crate::clock::Clock;
use crate::error::GenerationError;

/// Terminal result of tracking a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Succeeded { outputs: Vec<OutputFile> },
    Failed { detail: String, payload: Value },
    TimedOut { elapsed: Duration },
}

/// Result of feeding one observation into the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Waiting(JobStatus),
    Done(Completion),
}

#[derive(Debug, Clone)]
pub struct CompletionTracker {
    job_id: JobId,
    started_at: Instant,
    timeout: Duration,
    status: JobStatus,
    polls: u32,
}

impl CompletionTracker {
    /// `started_at` is the submission instant; the timeout is measured
    /// from there, not from the first poll.
    pub fn new(job_id: JobId, started_at: Instant, timeout: Duration) -> Self {
        Self {
            job_id,
            started_at,
            timeout,
            status: JobStatus::Queued,
            polls: 0,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.elapsed(now) >= self.timeout
    }

    /// Time left before the deadline.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.timeout.saturating_sub(self.elapsed(now))
    }

    /// Give up waiting. The backend job is left alone.
    pub fn expire(&mut self, now: Instant) -> Completion {
        self.transition(JobStatus::TimedOut);
        Completion::TimedOut {
            elapsed: self.elapsed(now),
        }
    }

    /// Apply one backend observation made at `now`.
    ///
    /// An observation that arrives after the deadline is discarded and
    /// the job is reported as timed out.
    pub fn observe(&mut self, now: Instant, observed: BackendStatus) -> Step {
        if self.status.is_terminal() {
            tracing::warn!(job_id = %self.job_id, status = %self.status, "Observation after terminal state");
        }
        self.polls += 1;

        if self.is_expired(now) {
            return Step::Done(self.expire(now));
        }

        match observed {
            BackendStatus::Succeeded { outputs } => {
                self.transition(JobStatus::Succeeded);
                Step::Done(Completion::Succeeded { outputs })
            }
            BackendStatus::Failed { detail, payload } => {
                self.transition(JobStatus::Failed);
                Step::Done(Completion::Failed { detail, payload })
            }
            BackendStatus::Running { pending } => {
                tracing::debug!(job_id = %self.job_id, pending, "Job executing");
                self.transition(JobStatus::Running);
                Step::Waiting(self.status)
            }
            BackendStatus::Queued {
                position,
                running,
                pending,
            } => {
                tracing::debug!(
                    job_id = %self.job_id,
                    position = ?position,
                    running,
                    pending,
                    "Job waiting in queue",
                );
                Step::Waiting(self.status)
            }
            BackendStatus::NotFound => {
                tracing::debug!(job_id = %self.job_id, "Job not visible in queue or history yet");
                Step::Waiting(self.status)
            }
        }
    }

    fn transition(&mut self, to: JobStatus) {
        if self.status != to {
            tracing::info!(
                job_id = %self.job_id,
                from = %self.status,
                to = %to,
                polls = self.polls,
                "Job status changed",
            );
            self.status = to;
        }
    }
}

/// Poll `backend` every `interval` until the job finishes, the timeout
/// elapses or `cancel` fires.
///
/// Transport failures while polling are logged and the loop continues;
/// only the deadline ends a wait on an unreachable backend. A status
/// request that has not answered by the deadline is dropped.
pub async fn wait_for_completion(
    backend: &dyn Backend,
    clock: &dyn Clock,
    tracker: &mut CompletionTracker,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<OutputFile>, GenerationError> {
    let job_id = tracker.job_id().clone();

    let completion = loop {
        let now = clock.now();
        if tracker.is_expired(now) {
            break tracker.expire(now);
        }

        // A poll still in flight at the deadline is abandoned.
        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled { job_id: job_id.clone() }),
            result = backend.status(&job_id) => result,
            _ = clock.sleep(tracker.remaining(now)) => break tracker.expire(clock.now()),
        };

        let observed = match observed {
            Ok(status) => status,
            Err(e) if e.is_transient() => {
                tracing::warn!(job_id = %job_id, error = %e, "Status poll failed, will retry");
                BackendStatus::NotFound
            }
            Err(e) => return Err(e),
        };

        if let Step::Done(completion) = tracker.observe(clock.now(), observed) {
            break completion;
        }

        let wait = interval.min(tracker.remaining(clock.now()));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled { job_id: job_id.clone() }),
            _ = clock.sleep(wait) => {}
        }
    };

    match completion {
        Completion::Succeeded { outputs } => {
            tracing::info!(job_id = %job_id, files = outputs.len(), "Job completed");
            Ok(outputs)
        }
        Completion::Failed { detail, payload } => {
            tracing::error!(job_id = %job_id, detail = %detail, "Job failed on the backend");
            Err(GenerationError::Failed {
                job_id,
                detail,
                payload,
            })
        }
        Completion::TimedOut { elapsed } => {
            tracing::warn!(
                job_id = %job_id,
                elapsed_secs = elapsed.as_secs(),
                "Timed out waiting for job; it may still finish on the backend",
            );
            Err(GenerationError::TimedOut { job_id, elapsed })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    /// Replays a scripted sequence of statuses; the last one repeats.
    struct Scripted {
        statuses: Mutex<VecDeque<Result<BackendStatus, GenerationError>>>,
        polls: Mutex<u32>,
    }

    impl Scripted {
        fn new(statuses: Vec<Result<BackendStatus, GenerationError>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                polls: Mutex::new(0),
            }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Backend for Scripted {
        async fn submit(&self, _: &Value) -> Result<JobId, GenerationError> {
            unreachable!("tracker never submits")
        }

        async fn upload_image(&self, _: &Path, _: &str, _: &str, _: Vec<u8>) -> Result<String, GenerationError> {
            unreachable!("tracker never uploads")
        }

        async fn status(&self, _: &JobId) -> Result<BackendStatus, GenerationError> {
            *self.polls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                match statuses.front().unwrap() {
                    Ok(s) => Ok(s.clone()),
                    Err(_) => Err(GenerationError::Unreachable { message: "down".into() }),
                }
            }
        }
    }

    fn queued() -> BackendStatus {
        BackendStatus::Queued { position: Some(0), running: 1, pending: 1 }
    }

    fn clip() -> OutputFile {
        OutputFile {
            node_id: "8".into(),
            filename: "out_00001.mp4".into(),
            subfolder: String::new(),
            folder_type: "output".into(),
            fallback_extension: "mp4",
        }
    }

    const INTERVAL: Duration = Duration::from_secs(2);

    // -- step function ------------------------------------------------------

    #[test]
    fn queued_to_running_to_succeeded() {
        let start = Instant::now();
        let mut t = CompletionTracker::new(JobId::new("j"), start, Duration::from_secs(60));

        assert_eq!(t.observe(start, queued()), Step::Waiting(JobStatus::Queued));
        assert_eq!(
            t.observe(start + INTERVAL, BackendStatus::Running { pending: 0 }),
            Step::Waiting(JobStatus::Running)
        );
        let step = t.observe(start + INTERVAL * 2, BackendStatus::Succeeded { outputs: vec![clip()] });
        assert_eq!(step, Step::Done(Completion::Succeeded { outputs: vec![clip()] }));
        assert_eq!(t.status(), JobStatus::Succeeded);
        assert_eq!(t.polls(), 3);
    }

    #[test]
    fn running_is_never_demoted_to_queued() {
        let start = Instant::now();
        let mut t = CompletionTracker::new(JobId::new("j"), start, Duration::from_secs(60));
        t.observe(start, BackendStatus::Running { pending: 0 });
        assert_eq!(t.observe(start, queued()), Step::Waiting(JobStatus::Running));
        assert_eq!(t.observe(start, BackendStatus::NotFound), Step::Waiting(JobStatus::Running));
    }

    #[test]
    fn no_terminal_state_without_backend_marker() {
        let start = Instant::now();
        let mut t = CompletionTracker::new(JobId::new("j"), start, Duration::from_secs(60));
        for i in 0..20 {
            let step = t.observe(start + Duration::from_secs(i), BackendStatus::NotFound);
            assert_matches!(step, Step::Waiting(_));
        }
    }

    #[test]
    fn late_success_is_still_timed_out() {
        let start = Instant::now();
        let mut t = CompletionTracker::new(JobId::new("j"), start, Duration::from_secs(5));
        let step = t.observe(start + Duration::from_secs(5), BackendStatus::Succeeded { outputs: vec![clip()] });
        assert_matches!(step, Step::Done(Completion::TimedOut { .. }));
        assert_eq!(t.status(), JobStatus::TimedOut);
    }

    #[test]
    fn remaining_saturates() {
        let start = Instant::now();
        let t = CompletionTracker::new(JobId::new("j"), start, Duration::from_secs(5));
        assert_eq!(t.remaining(start + Duration::from_secs(3)), Duration::from_secs(2));
        assert_eq!(t.remaining(start + Duration::from_secs(9)), Duration::ZERO);
    }

    // -- poll loop ----------------------------------------------------------

    #[tokio::test]
    async fn loop_returns_outputs_on_success() {
        let backend = Scripted::new(vec![
            Ok(queued()),
            Ok(BackendStatus::Running { pending: 0 }),
            Ok(BackendStatus::Succeeded { outputs: vec![clip()] }),
        ]);
        let clock = ManualClock::new();
        let mut t = CompletionTracker::new(JobId::new("j"), clock.now(), Duration::from_secs(60));

        let outputs = wait_for_completion(&backend, &clock, &mut t, INTERVAL, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outputs, vec![clip()]);
        assert_eq!(backend.polls(), 3);
        assert_eq!(clock.elapsed(), INTERVAL * 2);
    }

    #[tokio::test]
    async fn backend_error_fails_fast() {
        let backend = Scripted::new(vec![
            Ok(BackendStatus::Running { pending: 0 }),
            Ok(BackendStatus::Failed {
                detail: "Node 6 (KSampler): RuntimeError: CUDA out of memory".into(),
                payload: json!([["execution_error", {"node_id": "6"}]]),
            }),
        ]);
        let clock = ManualClock::new();
        let mut t = CompletionTracker::new(JobId::new("j"), clock.now(), Duration::from_secs(60));

        let err = wait_for_completion(&backend, &clock, &mut t, INTERVAL, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, GenerationError::Failed { ref detail, .. } if detail.contains("CUDA out of memory"));
        assert_eq!(backend.polls(), 2);
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn never_terminal_times_out_with_job_id() {
        let backend = Scripted::new(vec![Ok(queued())]);
        let clock = ManualClock::new();
        let mut t = CompletionTracker::new(JobId::new("abc-123"), clock.now(), Duration::from_secs(5));

        let err = wait_for_completion(&backend, &clock, &mut t, INTERVAL, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, GenerationError::TimedOut { ref job_id, elapsed } => {
            assert_eq!(job_id.as_str(), "abc-123");
            assert_eq!(elapsed, Duration::from_secs(5));
        });
        // Polls at 0s, 2s, 4s; the last sleep is capped at the deadline.
        assert_eq!(backend.polls(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timeout_counts_from_submission() {
        let backend = Scripted::new(vec![Ok(queued())]);
        let clock = ManualClock::new();
        let submitted = clock.now();
        clock.advance(Duration::from_secs(10));
        let mut t = CompletionTracker::new(JobId::new("j"), submitted, Duration::from_secs(5));

        let err = wait_for_completion(&backend, &clock, &mut t, INTERVAL, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, GenerationError::TimedOut { .. });
        assert_eq!(backend.polls(), 0);
    }

    #[tokio::test]
    async fn transport_errors_keep_polling() {
        let backend = Scripted::new(vec![
            Err(GenerationError::Unreachable { message: "reset".into() }),
            Ok(BackendStatus::Succeeded { outputs: vec![clip()] }),
        ]);
        let clock = ManualClock::new();
        let mut t = CompletionTracker::new(JobId::new("j"), clock.now(), Duration::from_secs(60));

        let outputs = wait_for_completion(&backend, &clock, &mut t, INTERVAL, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(backend.polls(), 2);
    }

    /// Never answers a status request.
    struct Stalled;

    #[async_trait]
    impl Backend for Stalled {
        async fn submit(&self, _: &Value) -> Result<JobId, GenerationError> {
            unreachable!("tracker never submits")
        }

        async fn upload_image(&self, _: &Path, _: &str, _: &str, _: Vec<u8>) -> Result<String, GenerationError> {
            unreachable!("tracker never uploads")
        }

        async fn status(&self, _: &JobId) -> Result<BackendStatus, GenerationError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_poll_is_cut_off_at_deadline() {
        let clock = ManualClock::new();
        let mut t = CompletionTracker::new(JobId::new("slow"), clock.now(), Duration::from_secs(5));

        let err = wait_for_completion(&Stalled, &clock, &mut t, INTERVAL, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(err, GenerationError::TimedOut { ref job_id, elapsed } => {
            assert_eq!(job_id.as_str(), "slow");
            assert_eq!(elapsed, Duration::from_secs(5));
        });
        assert_eq!(t.status(), JobStatus::TimedOut);
    }

    #[tokio::test]
    async fn stalled_poll_times_out_on_wall_clock() {
        let mut t = CompletionTracker::new(JobId::new("slow"), Instant::now(), Duration::from_millis(200));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_completion(&Stalled, &SystemClock, &mut t, INTERVAL, &CancellationToken::new()),
        )
        .await
        .expect("deadline did not interrupt the stalled poll");

        assert_matches!(result, Err(GenerationError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn cancellation_preserves_job_id() {
        let backend = Arc::new(Scripted::new(vec![Ok(queued())]));
        let clock = ManualClock::new();
        let mut t = CompletionTracker::new(JobId::new("keep-me"), clock.now(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for_completion(backend.as_ref(), &clock, &mut t, INTERVAL, &cancel)
            .await
            .unwrap_err();
        assert_matches!(err, GenerationError::Cancelled { ref job_id } if job_id.as_str() == "keep-me");
    }
}
