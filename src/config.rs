//! Server configuration.
//!
//! [`ServerConfig`] holds everything the resource services and the event
//! publisher read at runtime: the public base URL used for `href` values,
//! list pagination bounds, and webhook delivery settings.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the resource services.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Public base URL without a trailing slash.
    /// Examples: "http://localhost:3000", "https://api.example.com"
    pub base_url: String,

    /// Page size used when a list request gives no limit.
    pub default_page_size: usize,

    /// Upper bound for a list request's limit.
    pub max_page_size: usize,

    /// Webhook delivery settings.
    pub webhook: WebhookConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            default_page_size: 20,
            max_page_size: 100,
            webhook: WebhookConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build a configuration from defaults overridden by environment variables.
    ///
    /// Reads `API_BASE_URL`, `WEBHOOK_MAX_RETRIES` and `WEBHOOK_RETRY_DELAY_MS`.
    /// Unparseable numbers keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(base_url) = lookup("API_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(retries) = lookup("WEBHOOK_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            config.webhook.max_retries = retries;
        }
        if let Some(delay) = lookup("WEBHOOK_RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
            config.webhook.retry_delay_ms = delay;
        }

        config
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Generate the `href` of a resource from its API path.
    ///
    /// ```rust
    /// use tmf_server::config::ServerConfig;
    ///
    /// let config = ServerConfig::default().with_base_url("https://api.example.com/");
    /// assert_eq!(
    ///     config.resource_href("/api/v1/tmf621/troubleTicket/get", "t1"),
    ///     "https://api.example.com/api/v1/tmf621/troubleTicket/get/t1"
    /// );
    /// ```
    pub fn resource_href(&self, api_path: &str, id: &str) -> String {
        format!("{}{}/{}", self.base_url, api_path, id)
    }

    /// Resolve a requested page size against the configured bounds.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

/// Webhook delivery settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    /// Total delivery attempts per subscription, including the first.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n * retry_delay_ms` before the next try.
    pub retry_delay_ms: u64,
    /// Per-request timeout handed to the transport.
    pub request_timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            request_timeout_ms: 10_000,
        }
    }
}

impl WebhookConfig {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
