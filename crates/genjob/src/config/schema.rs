use std::time::Duration;

use reqwest::Url;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::job::GenerationKind;
use crate::poller::PollPolicy;
use crate::secrets::{has_secret_source, resolve_secret_optional, SecretError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_env: Option<String>,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_base_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            base_url: default_base_url(),
            api_token: None,
            api_token_file: None,
            api_token_env: None,
            poll: PollConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            push: PushConfig::default(),
            http: HttpConfig::default(),
            routes: RoutesConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Poll cadence and budget for one kind of job.
    pub fn poll_policy(&self, kind: GenerationKind) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll.interval_secs),
            max_attempts: self.poll.max_attempts.for_kind(kind),
        }
    }

    /// Resolves the relay API token, if one is configured.
    pub fn api_token(&self) -> Result<Option<SecretString>, SecretError> {
        resolve_secret_optional(
            self.api_token.as_deref(),
            self.api_token_file.as_deref(),
            self.api_token_env.as_deref(),
        )
    }

    /// Whether any token source is configured. Does not read the source.
    pub fn has_api_token(&self) -> bool {
        has_secret_source(
            self.api_token.as_deref(),
            self.api_token_file.as_deref(),
            self.api_token_env.as_deref(),
        )
    }

    /// WebSocket URL of the push channel, derived from `base_url`.
    pub fn push_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };

        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch scheme to '{}'", scheme)))?;

        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base_path, self.push.path));
        Ok(url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub max_attempts: MaxAttemptsConfig,
}

fn default_interval_secs() -> u64 {
    5
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_attempts: MaxAttemptsConfig::default(),
        }
    }
}

/// Poll budget per kind. `null` polls until a terminal status arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxAttemptsConfig {
    #[serde(default = "default_image_attempts")]
    pub image: Option<u32>,
    #[serde(default)]
    pub video: Option<u32>,
    #[serde(default)]
    pub music: Option<u32>,
}

fn default_image_attempts() -> Option<u32> {
    Some(12)
}

impl Default for MaxAttemptsConfig {
    fn default() -> Self {
        Self {
            image: default_image_attempts(),
            video: None,
            music: None,
        }
    }
}

impl MaxAttemptsConfig {
    pub fn for_kind(&self, kind: GenerationKind) -> Option<u32> {
        match kind {
            GenerationKind::Image => self.image,
            GenerationKind::Video => self.video,
            GenerationKind::Music => self.music,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_push_path")]
    pub path: String,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_push_path() -> String {
    "/generation".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_push_path(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Relay route segment per kind, e.g. `runway` in `/api/runway/generate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music: Option<String>,
}

impl RoutesConfig {
    pub fn route_for(&self, kind: GenerationKind) -> &str {
        let configured = match kind {
            GenerationKind::Image => self.image.as_deref(),
            GenerationKind::Video => self.video.as_deref(),
            GenerationKind::Music => self.music.as_deref(),
        };
        configured.unwrap_or_else(|| kind.default_route())
    }
}
