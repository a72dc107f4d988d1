//! Generation job model and its state machine.
//!
//! Every status change, whether it arrives from a poll response or from the
//! push channel, goes through [`GenerationJob::apply`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::materializer::GenerationResult;
use crate::request::GenerationRequest;

/// What a job generates. Selects the relay route and the poll budget.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    #[default]
    Image,
    Video,
    Music,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 3] = [
        GenerationKind::Image,
        GenerationKind::Video,
        GenerationKind::Music,
    ];

    /// Relay route segment used when the configuration does not override it.
    pub fn default_route(&self) -> &'static str {
        match self {
            GenerationKind::Image => "runway",
            GenerationKind::Video => "creatomate",
            GenerationKind::Music => "music",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Image => "image",
            GenerationKind::Video => "video",
            GenerationKind::Music => "music",
        }
    }

    /// Capitalized name for user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            GenerationKind::Image => "Image",
            GenerationKind::Video => "Video",
            GenerationKind::Music => "Music",
        }
    }

    /// Frame size sent when the request does not set one. Music has none.
    pub fn default_dimensions(&self) -> Option<(u32, u32)> {
        match self {
            GenerationKind::Image => Some((1024, 1024)),
            GenerationKind::Video => Some((1280, 720)),
            GenerationKind::Music => None,
        }
    }
}

impl std::fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Returns true for `succeeded` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Position in the forward-only order `pending < processing < terminal`.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Succeeded | JobStatus::Failed => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamps a provider-reported percentage into `[0, 100]`.
pub fn clamp_progress(value: i64) -> u8 {
    // Lossless: the value is within u8 range after clamping.
    value.clamp(0, 100) as u8
}

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    Poll,
    Push,
}

/// The state a job reports, with the data that state carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pending { progress: Option<u8> },
    Processing { progress: Option<u8> },
    Succeeded(GenerationResult),
    Failed(String),
}

impl Outcome {
    pub fn pending(progress: Option<i64>) -> Self {
        Outcome::Pending {
            progress: progress.map(clamp_progress),
        }
    }

    pub fn processing(progress: Option<i64>) -> Self {
        Outcome::Processing {
            progress: progress.map(clamp_progress),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Outcome::Pending { .. } => JobStatus::Pending,
            Outcome::Processing { .. } => JobStatus::Processing,
            Outcome::Succeeded(_) => JobStatus::Succeeded,
            Outcome::Failed(_) => JobStatus::Failed,
        }
    }
}

/// A status report for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub job_id: String,
    pub outcome: Outcome,
    pub source: UpdateSource,
}

impl JobUpdate {
    pub fn from_poll(job_id: &str, outcome: Outcome) -> Self {
        Self {
            job_id: job_id.to_string(),
            outcome,
            source: UpdateSource::Poll,
        }
    }

    pub fn from_push(job_id: &str, outcome: Outcome) -> Self {
        Self {
            job_id: job_id.to_string(),
            outcome,
            source: UpdateSource::Push,
        }
    }
}

/// Effect of applying an update to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Moved from `pending` to `processing`.
    Advanced,
    /// Same status, new progress value.
    Progressed,
    /// Reached `succeeded` or `failed`.
    Completed,
    /// Nothing changed: stale, duplicate, or the job was already terminal.
    Ignored,
}

impl Transition {
    pub fn changed(&self) -> bool {
        !matches!(self, Transition::Ignored)
    }
}

/// One outstanding request to a generation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    /// Identifier assigned by the provider.
    pub job_id: String,
    pub kind: GenerationKind,
    pub client_id: String,
    pub prompt: String,
    pub status: JobStatus,
    /// Advisory percentage, always within `[0, 100]`.
    pub progress: u8,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only when `status` is `succeeded`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GenerationResult>,
    /// Set only when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationJob {
    /// Creates the `pending` job for a freshly accepted submission.
    pub fn pending(job_id: &str, request: &GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            kind: request.kind,
            client_id: request.client_id.clone().unwrap_or_default(),
            prompt: request.prompt.clone(),
            status: JobStatus::Pending,
            progress: 0,
            submitted_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies an update, enforcing forward-only transitions.
    ///
    /// Terminal jobs ignore everything. Updates ranking below the current
    /// status are dropped, so a late `processing` poll cannot undo a push
    /// that already moved the job on.
    pub fn apply(&mut self, update: JobUpdate) -> Transition {
        if self.status.is_terminal() {
            return Transition::Ignored;
        }

        let next = update.outcome.status();
        if next.rank() < self.status.rank() {
            return Transition::Ignored;
        }

        let now = Utc::now();
        match update.outcome {
            Outcome::Pending { progress } | Outcome::Processing { progress } => {
                let advanced = next != self.status;
                let progressed = progress.is_some_and(|p| p != self.progress);
                if !advanced && !progressed {
                    return Transition::Ignored;
                }

                self.status = next;
                if let Some(p) = progress {
                    self.progress = p;
                }
                self.updated_at = now;

                if advanced {
                    Transition::Advanced
                } else {
                    Transition::Progressed
                }
            }
            Outcome::Succeeded(result) => {
                self.status = JobStatus::Succeeded;
                self.progress = 100;
                self.result = Some(result);
                self.error = None;
                self.updated_at = now;
                self.completed_at = Some(now);
                Transition::Completed
            }
            Outcome::Failed(message) => {
                self.status = JobStatus::Failed;
                self.error = Some(message);
                self.result = None;
                self.updated_at = now;
                self.completed_at = Some(now);
                Transition::Completed
            }
        }
    }
}
