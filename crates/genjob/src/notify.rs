//! One-line user-facing notifications (the toast channel).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub timestamp: DateTime<Utc>,
    pub level: NotificationLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, job_id: Option<&str>, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            job_id: job_id.map(str::to_string),
            message: message.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, notification: Notification) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn info(&self, job_id: Option<&str>, message: &str) {
        self.send(Notification::new(NotificationLevel::Info, job_id, message));
    }

    pub fn error(&self, job_id: Option<&str>, message: &str) {
        log::warn!("{}", message);
        self.send(Notification::new(NotificationLevel::Error, job_id, message));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_and_error() {
        let notifier = Notifier::new(10);
        let mut rx = notifier.subscribe();

        notifier.info(Some("job-1"), "Image ready");
        notifier.error(None, "Please enter a prompt");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.level, NotificationLevel::Info);
        assert_eq!(first.job_id.as_deref(), Some("job-1"));

        let second = rx.try_recv().unwrap();
        assert_eq!(second.level, NotificationLevel::Error);
        assert!(second.job_id.is_none());
        assert_eq!(second.message, "Please enter a prompt");
    }

    #[test]
    fn test_serialization() {
        let notification = Notification::new(NotificationLevel::Error, Some("job-9"), "Timed out");
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["level"], "error");
        assert_eq!(value["jobId"], "job-9");
        assert_eq!(value["message"], "Timed out");
    }
}
