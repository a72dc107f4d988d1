//! Job event broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{GenerationJob, GenerationKind, JobStatus, Transition};
use crate::materializer::GenerationResult;

/// Snapshot of a job right after one of its transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub kind: GenerationKind,
    pub status: JobStatus,
    pub progress: u8,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Materialized result (set on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GenerationResult>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(job: &GenerationJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
            result: job.result.clone(),
            timestamp: job.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Broadcasts job events to every subscriber.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Emits the job's state if the transition changed anything.
    pub fn publish(&self, job: &GenerationJob, transition: Transition) {
        if transition.changed() {
            self.send(JobEvent::from_job(job));
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
