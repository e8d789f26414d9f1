//! Client for the backend FHIR server.
//!
//! Checkers use it to look up resources they cannot judge from the request
//! alone (e.g. the subject of an `Observation` being updated).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::AccessResult;
use crate::config::BackendConfig;
use crate::error::AccessError;

/// Read access to the backend FHIR server.
#[async_trait]
pub trait FhirClient: Send + Sync {
    /// Fetch a resource by relative path (e.g. `Observation/123`).
    ///
    /// Returns `Ok(None)` if the backend answers 404 or 410.
    async fn get_resource(&self, path: &str) -> AccessResult<Option<Value>>;

    /// Base URL of the backend, for logging.
    fn base_url(&self) -> &str;
}

/// [`FhirClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFhirClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpFhirClient {
    /// Create a client for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Configuration`] if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> AccessResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccessError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
        })
    }

    /// Create a client from the `[access.backend]` section.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Configuration`] if no base URL is configured.
    pub fn from_config(config: &BackendConfig) -> AccessResult<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| AccessError::configuration("access.backend.base_url is not set"))?;
        Self::new(base_url, config.timeout)
    }

    fn resource_url(&self, path: &str) -> AccessResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AccessError::backend(format!("invalid resource path '{path}': {e}")))
    }
}

#[async_trait]
impl FhirClient for HttpFhirClient {
    #[tracing::instrument(skip(self), fields(base_url = %self.base_url))]
    async fn get_resource(&self, path: &str) -> AccessResult<Option<Value>> {
        let url = self.resource_url(path)?;

        let response = self
            .http
            .get(url)
            .header("Accept", "application/fhir+json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Backend request failed");
                AccessError::backend(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            tracing::debug!(status = status.as_u16(), "Resource not found on backend");
            return Ok(None);
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Backend returned error status");
            return Err(AccessError::backend(format!(
                "backend returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AccessError::backend(format!("invalid JSON from backend: {e}")))?;

        Ok(Some(body))
    }

    fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}

/// `Url::join` drops the last segment unless the base ends with `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
