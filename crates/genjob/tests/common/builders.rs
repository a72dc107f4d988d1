//! Builders for tracker configuration and provider responses.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;

use genjob::provider::{ProviderError, StatusPayload};
use genjob::{GenerationKind, GenerationRequest, GenerationTracker, TrackerConfig};

use super::FakeProvider;

/// Builder for `TrackerConfig` instances with the push channel off.
pub struct ConfigBuilder {
    config: TrackerConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = TrackerConfig::default();
        config.push.enabled = false;
        Self { config }
    }

    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.config.poll.interval_secs = secs;
        self
    }

    pub fn max_attempts(mut self, kind: GenerationKind, attempts: Option<u32>) -> Self {
        match kind {
            GenerationKind::Image => self.config.poll.max_attempts.image = attempts,
            GenerationKind::Video => self.config.poll.max_attempts.video = attempts,
            GenerationKind::Music => self.config.poll.max_attempts.music = attempts,
        }
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    pub fn build(self) -> TrackerConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracker over the given fake provider with default test configuration.
pub fn tracker_with(provider: &Arc<FakeProvider>) -> GenerationTracker {
    tracker_with_config(provider, ConfigBuilder::new().build())
}

pub fn tracker_with_config(provider: &Arc<FakeProvider>, config: TrackerConfig) -> GenerationTracker {
    GenerationTracker::new(provider.clone(), config)
}

pub fn image_request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(GenerationKind::Image, prompt).client("client-1")
}

pub fn pending() -> Result<StatusPayload, ProviderError> {
    Ok(StatusPayload::new("pending"))
}

pub fn processing(progress: i64) -> Result<StatusPayload, ProviderError> {
    Ok(StatusPayload::new("processing").with_progress(progress))
}

pub fn succeeded(url: &str) -> Result<StatusPayload, ProviderError> {
    Ok(StatusPayload::new("succeeded").with_field("url", json!(url)))
}

pub fn failed(message: &str) -> Result<StatusPayload, ProviderError> {
    Ok(StatusPayload::new("failed").with_error(message))
}

pub fn network_error(message: &str) -> Result<StatusPayload, ProviderError> {
    Err(ProviderError::Network(message.to_string()))
}
