//! Status poller.
//!
//! One poll loop runs per tracked job. It waits a fixed interval, asks the
//! provider for the job's status and feeds the answer through the job's
//! transition function until the job is terminal, the attempt budget runs
//! out, or the loop is cancelled.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::job::{GenerationKind, JobStatus, JobUpdate, Outcome, Transition};
use crate::materializer::materialize;
use crate::provider::{GenerationProvider, StatusPayload};
use crate::store::JobStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_IMAGE_MAX_ATTEMPTS: u32 = 12;

/// Fixed cadence, no backoff. `max_attempts: None` polls until terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Image generations give up after a minute of polling.
    pub fn image() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, Some(DEFAULT_IMAGE_MAX_ATTEMPTS))
    }

    pub fn unbounded() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, None)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Why a poll loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// This loop drove the job to a terminal status.
    Terminal(JobStatus),
    /// The job was cancelled or is no longer tracked.
    Cancelled,
    /// Something else (the push channel) finished the job first.
    AlreadyTerminal,
}

/// Where a poll loop reads job state and records its updates.
pub trait UpdateSink: Send + Sync {
    /// Current status, or `None` once the job is no longer tracked.
    fn status(&self, job_id: &str) -> Option<JobStatus>;

    /// Applies an update. `None` means the job is no longer tracked.
    fn apply(&self, update: JobUpdate) -> Option<Transition>;
}

impl UpdateSink for JobStore {
    fn status(&self, job_id: &str) -> Option<JobStatus> {
        JobStore::status(self, job_id)
    }

    fn apply(&self, update: JobUpdate) -> Option<Transition> {
        JobStore::apply(self, update).map(|(transition, _)| transition)
    }
}

/// The poll loop for a single job.
pub struct JobPoller {
    provider: Arc<dyn GenerationProvider>,
    sink: Arc<dyn UpdateSink>,
    policy: PollPolicy,
    job_id: String,
    kind: GenerationKind,
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

impl JobPoller {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        sink: Arc<dyn UpdateSink>,
        policy: PollPolicy,
        job_id: &str,
        kind: GenerationKind,
    ) -> Self {
        Self {
            provider,
            sink,
            policy,
            job_id: job_id.to_string(),
            kind,
            cancel: CancellationToken::new(),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shares a wake-up signal; notifying it skips the rest of the current wait.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> PollExit {
        let job_id = self.job_id.as_str();
        let mut attempts: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Polling cancelled for job {}", job_id);
                    return PollExit::Cancelled;
                }
                _ = self.wake.notified() => {
                    debug!("Early poll requested for job {}", job_id);
                }
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            match self.sink.status(job_id) {
                None => return PollExit::Cancelled,
                Some(status) if status.is_terminal() => {
                    debug!("Job {} already {}, stopping poller", job_id, status);
                    return PollExit::AlreadyTerminal;
                }
                Some(_) => {}
            }

            attempts += 1;
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PollExit::Cancelled,
                response = self.provider.status(self.kind, job_id) => response,
            };

            let outcome = match response {
                Ok(payload) => outcome_from_payload(self.kind, job_id, &payload),
                Err(e) => {
                    warn!("Status check {} for job {} failed: {}", attempts, job_id, e);
                    Outcome::Failed(e.to_string())
                }
            };

            if self.sink.apply(JobUpdate::from_poll(job_id, outcome)).is_none() {
                return PollExit::Cancelled;
            }

            match self.sink.status(job_id) {
                None => return PollExit::Cancelled,
                Some(status) if status.is_terminal() => {
                    info!("Job {} finished as {} after {} polls", job_id, status, attempts);
                    return PollExit::Terminal(status);
                }
                Some(_) => {}
            }

            if let Some(max_attempts) = self.policy.max_attempts {
                if attempts >= max_attempts {
                    warn!("Job {} still running after {} polls, giving up", job_id, attempts);
                    let message = timeout_message(self.kind, attempts, self.policy.interval);
                    self.sink
                        .apply(JobUpdate::from_poll(job_id, Outcome::Failed(message)));
                    return match self.sink.status(job_id) {
                        Some(status) => PollExit::Terminal(status),
                        None => PollExit::Cancelled,
                    };
                }
            }
        }
    }
}

/// Interprets one status response.
///
/// A succeeded job is materialized here so that `succeeded` never reaches
/// the store without a result.
pub fn outcome_from_payload(kind: GenerationKind, job_id: &str, payload: &StatusPayload) -> Outcome {
    match payload.job_status(job_id) {
        JobStatus::Pending => Outcome::pending(payload.progress),
        JobStatus::Processing => Outcome::processing(payload.progress),
        JobStatus::Succeeded => match materialize(kind, job_id, payload) {
            Ok(result) => Outcome::Succeeded(result),
            Err(e) => Outcome::Failed(e.to_string()),
        },
        JobStatus::Failed => Outcome::Failed(
            payload
                .error
                .clone()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| format!("{} generation failed", kind.label())),
        ),
    }
}

fn timeout_message(kind: GenerationKind, attempts: u32, interval: Duration) -> String {
    let waited = interval.saturating_mul(attempts).as_secs();
    format!(
        "{} generation timed out after {} status checks ({}s)",
        kind.label(),
        attempts,
        waited
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policies() {
        assert_eq!(PollPolicy::image().max_attempts, Some(12));
        assert_eq!(PollPolicy::image().interval, Duration::from_secs(5));
        assert_eq!(PollPolicy::default().max_attempts, None);
    }

    #[test]
    fn test_outcome_in_progress() {
        let payload = StatusPayload::new("processing").with_progress(45);
        assert_eq!(
            outcome_from_payload(GenerationKind::Image, "job-1", &payload),
            Outcome::Processing { progress: Some(45) }
        );

        let payload = StatusPayload::new("queued");
        assert_eq!(
            outcome_from_payload(GenerationKind::Video, "job-1", &payload),
            Outcome::Pending { progress: None }
        );
    }

    #[test]
    fn test_outcome_succeeded_is_materialized() {
        let payload =
            StatusPayload::new("succeeded").with_field("imageUrl", json!("https://x/img.png"));
        match outcome_from_payload(GenerationKind::Image, "job-1", &payload) {
            Outcome::Succeeded(result) => assert_eq!(result.url, "https://x/img.png"),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_succeeded_without_url_fails() {
        let payload = StatusPayload::new("succeeded");
        let outcome = outcome_from_payload(GenerationKind::Image, "job-1", &payload);
        assert!(matches!(outcome, Outcome::Failed(msg) if msg.contains("job-1")));
    }

    #[test]
    fn test_outcome_failed_message() {
        let payload = StatusPayload::new("failed").with_error("content policy");
        assert_eq!(
            outcome_from_payload(GenerationKind::Music, "job-1", &payload),
            Outcome::Failed("content policy".to_string())
        );

        let payload = StatusPayload::new("failed");
        assert_eq!(
            outcome_from_payload(GenerationKind::Music, "job-1", &payload),
            Outcome::Failed("Music generation failed".to_string())
        );
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            timeout_message(GenerationKind::Image, 12, Duration::from_secs(5)),
            "Image generation timed out after 12 status checks (60s)"
        );
    }
}
