//! Webhook delivery with bounded retry.
//!
//! The HTTP client is a collaborator behind [`WebhookTransport`]; this module
//! only decides what to send and whether to try again. A 2xx response is a
//! success, a 4xx response is final, anything else is retried after a linear
//! backoff until the configured number of attempts is used up.

use log::{debug, error, warn};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::config::WebhookConfig;
use crate::events::{EventEnvelope, EventError};

/// One POST of an event to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub callback: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub timeout: Duration,
}

impl WebhookRequest {
    /// Request carrying `envelope` with the TMF event headers.
    pub fn for_envelope(
        callback: impl Into<String>,
        envelope: &EventEnvelope,
        timeout: Duration,
    ) -> Result<Self, EventError> {
        Ok(Self {
            callback: callback.into(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Event-Type".to_string(), envelope.event_type.clone()),
                ("X-Event-Id".to_string(), envelope.event_id.clone()),
                ("X-Correlation-Id".to_string(), envelope.correlation_id.clone()),
            ],
            body: serde_json::to_value(envelope)?,
            timeout,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends webhook requests and reports the HTTP status.
pub trait WebhookTransport: Send + Sync {
    fn post(&self, request: WebhookRequest)
    -> impl Future<Output = Result<u16, EventError>> + Send;
}

/// Transport that drops every request and reports `204 No Content`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl WebhookTransport for NullTransport {
    async fn post(&self, request: WebhookRequest) -> Result<u16, EventError> {
        debug!("Discarding webhook delivery to {}", request.callback);
        Ok(204)
    }
}

/// Result of delivering one event to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// The subscriber answered with a client error; not retried.
    Rejected { status: u16 },
    /// Every attempt failed.
    Failed { attempts: u32, reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Deliver a request, retrying server errors and transport failures.
pub async fn deliver_with_retry<T: WebhookTransport>(
    transport: &T,
    config: &WebhookConfig,
    request: WebhookRequest,
) -> DeliveryOutcome {
    let max_attempts = config.max_retries.max(1);

    let mut attempt = 1;
    loop {
        let failure = match transport.post(request.clone()).await {
            Ok(status) if (200..300).contains(&status) => {
                debug!("Webhook delivered successfully to: {}", request.callback);
                return DeliveryOutcome::Delivered { attempts: attempt };
            }
            Ok(status) if (400..500).contains(&status) => {
                warn!(
                    "Webhook delivery failed with client error {}: {}",
                    status, request.callback
                );
                return DeliveryOutcome::Rejected { status };
            }
            Ok(status) => EventError::Status { status },
            Err(e) => e,
        };

        if attempt >= max_attempts {
            error!(
                "Webhook delivery failed after {} attempts: {} - {}",
                attempt, request.callback, failure
            );
            return DeliveryOutcome::Failed {
                attempts: attempt,
                reason: failure.to_string(),
            };
        }

        let delay = config.backoff(attempt);
        debug!(
            "Webhook delivery attempt {} failed, retrying in {}ms: {}",
            attempt,
            delay.as_millis(),
            failure
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
