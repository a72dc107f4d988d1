//! Generation provider access.
//!
//! The tracker talks to providers through [`GenerationProvider`]; the
//! production implementation is [`HttpProvider`], which goes through the
//! application's relay endpoints.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::job::{GenerationKind, JobStatus};
use crate::request::GenerationRequest;

pub use http::HttpProvider;

/// Errors from talking to a provider. None of them are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Provider response did not include a job id")]
    MissingJobId,

    #[error("Provider returned job id {0}, which is already being tracked")]
    DuplicateJobId(String),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

/// Submits generations and reports their status.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Sends one generate request and returns the provider's job id.
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError>;

    /// Fetches the current status of a job. Must be idempotent.
    async fn status(&self, kind: GenerationKind, job_id: &str)
        -> Result<StatusPayload, ProviderError>;
}

/// Status response body as the provider reports it.
///
/// Only `status`, `progress` and `error` are interpreted here; everything
/// else is kept in `fields` for the materializer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_message")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StatusPayload {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Maps the provider's status spelling onto [`JobStatus`].
    pub fn job_status(&self, job_id: &str) -> JobStatus {
        parse_status(&self.status, job_id)
    }
}

/// Maps provider status spellings (`queued`, `RUNNING`, `completed`, ...)
/// onto [`JobStatus`]. Unknown spellings are treated as still running.
pub fn parse_status(raw: &str, job_id: &str) -> JobStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "pending" | "queued" | "throttled" | "submitted" | "planned" | "waiting" => {
            JobStatus::Pending
        }
        "processing" | "running" | "in_progress" | "rendering" | "transcribing" | "started" => {
            JobStatus::Processing
        }
        "succeeded" | "success" | "completed" | "complete" | "done" => JobStatus::Succeeded,
        "failed" | "failure" | "error" | "cancelled" | "canceled" | "aborted" => JobStatus::Failed,
        other => {
            log::warn!(
                "Unknown provider status '{}' for job {}, treating as processing",
                other,
                job_id
            );
            JobStatus::Processing
        }
    }
}

/// Accepts integers, floats and numeric strings.
pub(crate) fn deserialize_progress<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }))
}

/// Accepts a string, or any other JSON value rendered as text.
pub(crate) fn deserialize_message<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        Value::Object(ref map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(v.to_string())),
        other => Some(other.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_statuses() {
        assert_eq!(parse_status("pending", "j"), JobStatus::Pending);
        assert_eq!(parse_status("QUEUED", "j"), JobStatus::Pending);
        assert_eq!(parse_status("RUNNING", "j"), JobStatus::Processing);
        assert_eq!(parse_status("processing", "j"), JobStatus::Processing);
        assert_eq!(parse_status("SUCCEEDED", "j"), JobStatus::Succeeded);
        assert_eq!(parse_status("completed", "j"), JobStatus::Succeeded);
        assert_eq!(parse_status("FAILED", "j"), JobStatus::Failed);
        assert_eq!(parse_status("cancelled", "j"), JobStatus::Failed);
    }

    #[test]
    fn test_parse_unknown_status_keeps_running() {
        assert_eq!(parse_status("warming_up", "j"), JobStatus::Processing);
    }

    #[test]
    fn test_payload_keeps_extra_fields() {
        let payload: StatusPayload = serde_json::from_value(json!({
            "status": "succeeded",
            "progress": 100,
            "url": "https://x/img.png",
            "seed": 7
        }))
        .unwrap();

        assert_eq!(payload.job_status("j"), JobStatus::Succeeded);
        assert_eq!(payload.progress, Some(100));
        assert!(payload.error.is_none());
        assert_eq!(payload.fields["url"], "https://x/img.png");
        assert_eq!(payload.fields["seed"], 7);
    }

    #[test]
    fn test_lenient_progress() {
        let payload: StatusPayload =
            serde_json::from_value(json!({ "status": "processing", "progress": 44.6 })).unwrap();
        assert_eq!(payload.progress, Some(45));

        let payload: StatusPayload =
            serde_json::from_value(json!({ "status": "processing", "progress": "45" })).unwrap();
        assert_eq!(payload.progress, Some(45));

        let payload: StatusPayload =
            serde_json::from_value(json!({ "status": "processing", "progress": null })).unwrap();
        assert_eq!(payload.progress, None);
    }

    #[test]
    fn test_lenient_error() {
        let payload: StatusPayload = serde_json::from_value(json!({
            "status": "failed",
            "error": { "code": 429, "message": "rate limited" }
        }))
        .unwrap();
        assert_eq!(payload.error.as_deref(), Some("rate limited"));

        let payload: StatusPayload =
            serde_json::from_value(json!({ "status": "failed", "error": "" })).unwrap();
        assert!(payload.error.is_none());
    }
}
