//! Shared HTTP client for the BaaS adapters

use std::time::Duration;

use reqwest::RequestBuilder;
use tracing::info;

use super::error::BaasError;

/// Connection settings for the backend
#[derive(Debug, Clone)]
pub struct BaasConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`
    pub url: String,
    /// Service API key, sent as `apikey` on every request
    pub service_key: String,
    /// Per-request timeout (default: 30s)
    pub timeout: Duration,
    /// Name of the users relation (default: `users`)
    pub users_table: String,
}

impl BaasConfig {
    /// Create a configuration with default timeout and table name
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(30),
            users_table: "users".to_string(),
        }
    }
}

/// Handle shared by the session, directory and storage adapters
///
/// Cloning is cheap: the inner `reqwest::Client` is reference counted.
#[derive(Clone)]
pub struct BaasClient {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
    users_table: String,
}

impl BaasClient {
    /// Build a client from configuration
    ///
    /// # Errors
    ///
    /// Returns `BaasError::Config` if the URL or key is empty, or if the
    /// HTTP client cannot be built.
    pub fn new(config: &BaasConfig) -> Result<Self, BaasError> {
        let base_url = config.url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BaasError::config("BaaS URL is empty"));
        }
        if config.service_key.trim().is_empty() {
            return Err(BaasError::config("BaaS service key is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BaasError::config(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %base_url, "Initializing BaaS client");

        Ok(Self {
            http,
            base_url,
            service_key: config.service_key.clone(),
            users_table: config.users_table.clone(),
        })
    }

    /// Get the project base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn users_table(&self) -> &str {
        &self.users_table
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.with_api_key(self.http.get(self.url(path)))
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.with_api_key(self.http.post(self.url(path)))
    }

    /// Authorize as the service role
    pub(crate) fn as_service(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.service_key)
    }

    fn with_api_key(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.service_key)
    }
}
