//! Resource events: envelopes, the internal bus and webhook delivery.
//!
//! Every create, patch and delete of a resource produces one
//! [`EventEnvelope`]. The [`EventPublisher`] emits it on an [`EventBus`] and
//! posts it to the tenant's webhook subscribers through a
//! [`WebhookTransport`].

pub mod bus;
pub mod envelope;
pub mod publisher;
pub mod webhook;

pub use bus::{EventBus, InMemoryEventBus};
pub use envelope::{EventEnvelope, EventKind};
pub use publisher::{EventPublisher, SUBSCRIPTION_COLLECTION, Subscription};
pub use webhook::{
    DeliveryOutcome, NullTransport, WebhookRequest, WebhookTransport, deliver_with_retry,
};

/// Errors raised while emitting or delivering events.
///
/// These never reach the caller of a resource operation; the publisher logs
/// them.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Message broker not available: {0}")]
    BusUnavailable(String),

    #[error("Webhook transport error: {0}")]
    Transport(String),

    #[error("Server error: {status}")]
    Status { status: u16 },

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}
