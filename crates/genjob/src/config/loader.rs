use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::config::schema::TrackerConfig;
use crate::error::ConfigError;
use crate::job::GenerationKind;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Returns the canonical config path: `~/.genjob/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".genjob").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TrackerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<TrackerConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: TrackerConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &TrackerConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let base_url = Url::parse(&config.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
        url: config.base_url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: "scheme must be http or https".to_string(),
        });
    }

    if config.poll.interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "poll.interval_secs must be positive".to_string(),
        });
    }

    for kind in GenerationKind::ALL {
        if config.poll.max_attempts.for_kind(kind) == Some(0) {
            return Err(ConfigError::Validation {
                message: format!("poll.max_attempts.{} must be positive or null", kind),
            });
        }

        let route = config.routes.route_for(kind);
        if route.trim().is_empty() || route.contains('/') {
            return Err(ConfigError::Validation {
                message: format!("routes.{} must be a single path segment, got '{}'", kind, route),
            });
        }
    }

    if config.history_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "history_capacity must be positive".to_string(),
        });
    }

    if !config.push.path.starts_with('/') {
        return Err(ConfigError::Validation {
            message: format!("push.path must start with '/', got '{}'", config.push.path),
        });
    }

    if config.http.connect_timeout_secs == 0 || config.http.request_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "http timeouts must be positive".to_string(),
        });
    }

    Ok(())
}
