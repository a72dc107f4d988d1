//! Generation requests as submitted to the relay.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::job::GenerationKind;

/// A request for one generation.
///
/// Serialized as the relay's `generate` body; the kind travels in the route,
/// not the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(skip)]
    pub kind: GenerationKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Clip length in seconds (video and music only).
    #[serde(rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl GenerationRequest {
    /// Starts a request with the kind's default frame size.
    pub fn new(kind: GenerationKind, prompt: &str) -> Self {
        let dimensions = kind.default_dimensions();
        Self {
            kind,
            prompt: prompt.to_string(),
            client_id: None,
            width: dimensions.map(|(width, _)| width),
            height: dimensions.map(|(_, height)| height),
            style: None,
            negative_prompt: None,
            duration_secs: None,
            seed: None,
        }
    }

    pub fn client(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn style(mut self, style: &str) -> Self {
        self.style = Some(style.to_string());
        self
    }

    pub fn negative_prompt(mut self, negative_prompt: &str) -> Self {
        self.negative_prompt = Some(negative_prompt.to_string());
        self
    }

    pub fn duration(mut self, secs: u32) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks the request before anything is sent.
    ///
    /// Prompt and client come first so the user sees the most basic
    /// problem before any option-level complaint.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }

        match self.client_id.as_deref() {
            Some(client) if !client.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingClient),
        }

        let width = self.width.unwrap_or(1);
        let height = self.height.unwrap_or(1);
        if width == 0 || height == 0 {
            return Err(ValidationError::InvalidDimensions { width, height });
        }

        match (self.kind, self.duration_secs) {
            (GenerationKind::Image, Some(_)) => Err(ValidationError::InvalidDuration {
                reason: "image requests do not take a duration".to_string(),
            }),
            (_, Some(0)) => Err(ValidationError::InvalidDuration {
                reason: "duration must be at least one second".to_string(),
            }),
            _ => Ok(()),
        }
    }
}
