use std::path::PathBuf;
use thiserror::Error;

use crate::provider::ProviderError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum GenJobError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Submission failed: {0}")]
    Submission(#[from] ProviderError),

    #[error("Invalid result: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

/// Input problems caught before any request leaves the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a prompt")]
    EmptyPrompt,

    #[error("Please select a client")]
    MissingClient,

    #[error("Invalid dimensions {width}x{height}: both sides must be positive")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid duration: {reason}")]
    InvalidDuration { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("Generation for job {job_id} finished without a result URL")]
    MissingUrl { job_id: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GenJobError>;
