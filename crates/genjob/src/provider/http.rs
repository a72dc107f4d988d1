//! Relay client over HTTP.
//!
//! Talks to the application's relay endpoints:
//! `POST {base}/api/<route>/generate` and `GET {base}/api/<route>/status/:jobId`,
//! both wrapped in a `{ success, data, error }` envelope.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{GenerationProvider, ProviderError, StatusPayload};
use crate::config::{RoutesConfig, TrackerConfig};
use crate::job::GenerationKind;
use crate::request::GenerationRequest;

/// Maximum length for error bodies copied into error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for HTTP requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Truncates a response body so a misbehaving relay cannot flood logs.
fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

fn create_http_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .map_err(|e| ProviderError::Client(e.to_string()))
}

/// Relay response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitData {
    #[serde(default, alias = "job_id", alias = "id")]
    job_id: Option<String>,
}

/// [`GenerationProvider`] backed by the relay's HTTP endpoints.
pub struct HttpProvider {
    client: Client,
    base_url: Url,
    routes: RoutesConfig,
    api_token: Option<SecretString>,
}

impl HttpProvider {
    /// Creates a provider with default routes and timeouts.
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        Self::build(
            base_url,
            RoutesConfig::default(),
            None,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Creates a provider from tracker configuration.
    pub fn from_config(
        config: &TrackerConfig,
        api_token: Option<SecretString>,
    ) -> Result<Self, ProviderError> {
        Self::build(
            &config.base_url,
            config.routes.clone(),
            api_token,
            Duration::from_secs(config.http.connect_timeout_secs),
            Duration::from_secs(config.http.request_timeout_secs),
        )
    }

    fn build(
        base_url: &str,
        routes: RoutesConfig,
        api_token: Option<SecretString>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ProviderError::Client(format!("Invalid base URL '{}': {}", base_url, e)))?;

        Ok(Self {
            client: create_http_client(connect_timeout, request_timeout)?,
            base_url,
            routes,
            api_token,
        })
    }

    /// Builds `{base}/api/<route>/<segments...>` with each segment escaped.
    fn endpoint(&self, kind: GenerationKind, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ProviderError::Client(format!("Base URL '{}' cannot be a base", self.base_url))
            })?;
            path.pop_if_empty()
                .push("api")
                .push(self.routes.route_for(kind));
            path.extend(segments);
        }
        Ok(url)
    }

    pub fn generate_url(&self, kind: GenerationKind) -> Result<Url, ProviderError> {
        self.endpoint(kind, &["generate"])
    }

    pub fn status_url(&self, kind: GenerationKind, job_id: &str) -> Result<Url, ProviderError> {
        self.endpoint(kind, &["status", job_id])
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }
}

/// Unwraps the relay envelope, returning the `data` member if present.
async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }

    let envelope: ApiEnvelope<T> = response
        .json()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))?;

    if !envelope.success {
        let reason = envelope
            .error
            .or(envelope.message)
            .unwrap_or_else(|| "no reason given".to_string());
        return Err(ProviderError::Rejected(reason));
    }

    Ok(envelope.data)
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let url = self.generate_url(request.kind)?;
        info!("Submitting {} generation to {}", request.kind, url);

        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let data: Option<SubmitData> = read_envelope(response).await?;
        match data.and_then(|d| d.job_id) {
            Some(job_id) if !job_id.trim().is_empty() => Ok(job_id),
            _ => Err(ProviderError::MissingJobId),
        }
    }

    async fn status(
        &self,
        kind: GenerationKind,
        job_id: &str,
    ) -> Result<StatusPayload, ProviderError> {
        let url = self.status_url(kind, job_id)?;
        debug!("Polling status of {} job {}", kind, job_id);

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        read_envelope(response)
            .await?
            .ok_or_else(|| ProviderError::Decode("status response has no data".to_string()))
    }
}
