//! Exponential-backoff retry for job submission.
//!
//! Only [`GenerationError::Unreachable`] is retried: every other failure
//! is either permanent or happens after the backend accepted the job.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vidgen_pipeline::submitter::SubmittedJob;
use vidgen_pipeline::{GenerationError, JobClient, PreparedJob};

pub struct RetryConfig {
    /// Attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to
/// [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Submit `prepared`, retrying while the backend is unreachable.
///
/// The prepared graph (and any uploaded image) is reused across
/// attempts. Cancelling stops the backoff and returns the last error.
pub async fn submit_with_retry(
    client: &JobClient,
    prepared: &PreparedJob,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<SubmittedJob, GenerationError> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match client.submit(prepared).await {
            Ok(submitted) => return Ok(submitted),
            Err(e) if e.is_transient() && attempt <= config.retries => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Submission failed, retrying",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Submission retry cancelled");
                return Err(err);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
