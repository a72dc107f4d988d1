pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod job;
pub mod logging;
pub mod materializer;
pub mod notify;
pub mod poller;
pub mod provider;
pub mod push;
pub mod request;
pub mod secrets;
pub mod store;
pub mod tracker;

pub use config::{default_config_path, load_config, load_config_from_str, TrackerConfig};
pub use error::{ConfigError, GenJobError, MaterializeError, Result, ValidationError};
pub use events::{JobEvent, JobEventBroadcaster};
pub use history::RecentGenerations;
pub use job::{GenerationJob, GenerationKind, JobStatus, JobUpdate, Outcome, Transition};
pub use logging::{init_logging, LogFormat};
pub use materializer::{materialize, GenerationResult};
pub use notify::{Notification, NotificationLevel, Notifier};
pub use poller::{JobPoller, PollExit, PollPolicy};
pub use provider::{GenerationProvider, HttpProvider, ProviderError, StatusPayload};
pub use push::{PushListener, PushMessage};
pub use request::GenerationRequest;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use store::{JobQuery, JobStats, JobStore};
pub use tracker::{GenerationTracker, JobHandle};
