//! Push channel.
//!
//! The relay broadcasts status changes over a WebSocket. Push messages are
//! an optimization on top of polling: they carry no result payload, so a
//! pushed `succeeded` only asks the job's poller to check right away.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::job::{JobStatus, JobUpdate, Outcome};
use crate::provider::{deserialize_message, deserialize_progress, parse_status};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Failed to connect to push channel {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Push channel error: {0}")]
    Transport(String),
}

/// One status message from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub job_id: String,
    pub status: String,
    #[serde(
        default,
        deserialize_with = "deserialize_progress",
        skip_serializing_if = "Option::is_none"
    )]
    pub progress: Option<i64>,
    #[serde(
        default,
        deserialize_with = "deserialize_message",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,
}

/// What the tracker should do with a push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushAction {
    /// Run the update through the transition function.
    Apply(JobUpdate),
    /// Poll the job now; the message alone cannot complete it.
    Wake(String),
}

impl PushMessage {
    pub fn new(job_id: &str, status: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: status.to_string(),
            progress: None,
            error: None,
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

    pub fn action(&self) -> PushAction {
        let job_id = self.job_id.as_str();
        let outcome = match parse_status(&self.status, job_id) {
            JobStatus::Pending => Outcome::pending(self.progress),
            JobStatus::Processing => Outcome::processing(self.progress),
            JobStatus::Succeeded => return PushAction::Wake(self.job_id.clone()),
            JobStatus::Failed => Outcome::Failed(
                self.error
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "Generation failed".to_string()),
            ),
        };
        PushAction::Apply(JobUpdate::from_push(job_id, outcome))
    }
}

pub type PushStream = Pin<Box<dyn Stream<Item = Result<PushMessage, PushError>> + Send>>;

/// Decodes one WebSocket frame. Control frames and malformed text yield `None`.
pub fn decode_frame(frame: &Message) -> Option<PushMessage> {
    match frame {
        Message::Text(text) => match serde_json::from_str::<PushMessage>(text) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Skipping undecodable push message: {}", e);
                None
            }
        },
        _ => None,
    }
}

/// Opens the push channel and returns its decoded messages.
pub async fn connect(url: &Url) -> Result<PushStream, PushError> {
    let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| PushError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    info!("Connected to push channel {}", url);

    let messages = socket.filter_map(|frame| async move {
        match frame {
            Ok(frame) => decode_frame(&frame).map(Ok),
            Err(e) => Some(Err(PushError::Transport(e.to_string()))),
        }
    });
    Ok(messages.boxed())
}

/// Keeps a push connection open, reconnecting after a fixed delay.
pub struct PushListener {
    url: Url,
    reconnect_delay: Duration,
}

impl PushListener {
    pub fn new(url: Url, reconnect_delay: Duration) -> Self {
        Self {
            url,
            reconnect_delay,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Delivers messages to `on_message` until `cancel` fires.
    pub async fn run<F>(&self, cancel: CancellationToken, on_message: F)
    where
        F: FnMut(PushMessage),
    {
        let mut on_message = on_message;

        loop {
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                connected = connect(&self.url) => connected,
            };

            match connected {
                Ok(stream) => {
                    if pump(stream, &cancel, &mut on_message).await.is_break() {
                        return;
                    }
                }
                Err(e) => warn!("{}", e),
            }

            debug!(
                "Reconnecting to push channel in {}s",
                self.reconnect_delay.as_secs()
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }
}

/// Drains one connection. Breaks when cancelled, continues on disconnect.
async fn pump<S, F>(
    mut stream: S,
    cancel: &CancellationToken,
    on_message: &mut F,
) -> std::ops::ControlFlow<()>
where
    S: Stream<Item = Result<PushMessage, PushError>> + Unpin,
    F: FnMut(PushMessage),
{
    use std::ops::ControlFlow;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ControlFlow::Break(()),
            next = stream.next() => match next {
                Some(Ok(message)) => on_message(message),
                Some(Err(e)) => {
                    warn!("{}", e);
                    return ControlFlow::Continue(());
                }
                None => {
                    info!("Push channel closed");
                    return ControlFlow::Continue(());
                }
            }
        }
    }
}
