//! Event publishing and the webhook subscription hub.
//!
//! Publishing emits the envelope on the internal bus and then delivers it to
//! every matching subscriber of the tenant. Neither step can fail the
//! operation that triggered the event: errors are logged and reported in the
//! returned delivery outcomes only.

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::error::{TmfError, TmfResult};
use crate::events::bus::{EventBus, InMemoryEventBus};
use crate::events::webhook::{
    DeliveryOutcome, NullTransport, WebhookRequest, WebhookTransport, deliver_with_retry,
};
use crate::events::EventEnvelope;
use crate::resource::page::Page;
use crate::storage::{ListQuery, StorageError, StorageKey, StoragePrefix, StorageProvider};

/// Collection holding webhook subscriptions.
pub const SUBSCRIPTION_COLLECTION: &str = "event_subscription";

/// A registered webhook listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub callback: String,
    /// Optional filter such as `eventType=TroubleTicketCreateEvent`
    #[serde(default)]
    pub query: Option<String>,
    pub api_domain: String,
}

impl Subscription {
    /// Whether the subscription wants events of this type.
    ///
    /// Without an `eventType=` clause every event matches.
    pub fn matches(&self, event_type: &str) -> bool {
        let Some(query) = self.query.as_deref() else {
            return true;
        };
        match query.split_once("eventType=") {
            Some((_, rest)) => rest.split('&').next() == Some(event_type),
            None => true,
        }
    }

    /// Hub representation returned to clients.
    pub fn to_hub(&self) -> Value {
        json!({
            "id": self.id,
            "callback": self.callback,
            "query": self.query,
            "@type": "Hub"
        })
    }
}

fn validate_callback(callback: &str) -> TmfResult<()> {
    let valid = ["http://", "https://"]
        .iter()
        .any(|scheme| callback.len() > scheme.len() && callback.starts_with(scheme));
    if valid {
        Ok(())
    } else {
        Err(TmfError::validation(format!(
            "The 'callback' field must be a valid URL, got '{}'",
            callback
        )))
    }
}

/// Publishes resource events and manages webhook subscriptions.
pub struct EventPublisher<S, B = InMemoryEventBus, T = NullTransport> {
    storage: S,
    bus: B,
    transport: T,
    config: WebhookConfig,
}

impl<S> EventPublisher<S, InMemoryEventBus, NullTransport>
where
    S: StorageProvider<Error = StorageError>,
{
    /// Publisher with an in-memory bus that discards webhook deliveries.
    pub fn in_memory(storage: S, config: WebhookConfig) -> Self {
        Self::new(storage, InMemoryEventBus::new(), NullTransport, config)
    }
}

impl<S, B, T> EventPublisher<S, B, T>
where
    S: StorageProvider<Error = StorageError>,
    B: EventBus,
    T: WebhookTransport,
{
    pub fn new(storage: S, bus: B, transport: T, config: WebhookConfig) -> Self {
        Self {
            storage,
            bus,
            transport,
            config,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn prefix(tenant_id: &str) -> StoragePrefix {
        StorageKey::prefix(tenant_id, SUBSCRIPTION_COLLECTION)
    }

    /// Emit an envelope on the bus and deliver it to matching subscribers.
    pub async fn publish(
        &self,
        tenant_id: &str,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Vec<DeliveryOutcome> {
        debug!(
            "Publishing {} ({}) for tenant '{}'",
            envelope.event_type, envelope.event_id, tenant_id
        );

        if let Err(e) = self.bus.emit(topic, envelope).await {
            error!("Failed to publish to message broker: {}", e);
        }

        self.deliver_to_webhooks(tenant_id, envelope).await
    }

    async fn deliver_to_webhooks(
        &self,
        tenant_id: &str,
        envelope: &EventEnvelope,
    ) -> Vec<DeliveryOutcome> {
        let query = ListQuery::new().with_filter("apiDomain", envelope.domain.as_str());
        let rows = match self.storage.list(Self::prefix(tenant_id), &query).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Failed to deliver webhooks: {}", e);
                return Vec::new();
            }
        };

        let subscriptions: Vec<Subscription> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<Subscription>(row) {
                Ok(subscription) => Some(subscription),
                Err(e) => {
                    warn!("Skipping unreadable subscription: {}", e);
                    None
                }
            })
            .filter(|subscription| subscription.matches(&envelope.event_type))
            .collect();

        let timeout = self.config.request_timeout();
        let deliveries = subscriptions.iter().map(|subscription| async move {
            match WebhookRequest::for_envelope(&subscription.callback, envelope, timeout) {
                Ok(request) => deliver_with_retry(&self.transport, &self.config, request).await,
                Err(e) => DeliveryOutcome::Failed {
                    attempts: 0,
                    reason: e.to_string(),
                },
            }
        });
        let outcomes = join_all(deliveries).await;

        let failures = outcomes.iter().filter(|outcome| !outcome.is_delivered()).count();
        if failures > 0 {
            warn!("{} webhook deliveries failed", failures);
        }
        outcomes
    }

    /// Register a callback; an existing subscription for the same callback is
    /// returned unchanged.
    pub async fn subscribe(
        &self,
        tenant_id: &str,
        api_domain: &str,
        callback: &str,
        query: Option<String>,
    ) -> TmfResult<Value> {
        validate_callback(callback)?;

        let existing = self
            .storage
            .find_by_attribute(Self::prefix(tenant_id), "callback", callback)
            .await?;
        if let Some(row) = existing.into_iter().next() {
            let subscription: Subscription = serde_json::from_value(row)?;
            debug!(
                "Reusing subscription {} for callback: {}",
                subscription.id, callback
            );
            return Ok(subscription.to_hub());
        }

        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            callback: callback.to_string(),
            query: query.filter(|q| !q.is_empty()),
            api_domain: api_domain.to_string(),
        };
        self.storage
            .create(
                Self::prefix(tenant_id).key(&subscription.id),
                serde_json::to_value(&subscription)?,
            )
            .await?;

        info!(
            "New event subscription created: {} for callback: {}",
            subscription.id, callback
        );
        Ok(subscription.to_hub())
    }

    pub async fn unsubscribe(&self, tenant_id: &str, id: &str) -> TmfResult<()> {
        let removed = self.storage.delete(Self::prefix(tenant_id).key(id)).await?;
        if !removed {
            return Err(TmfError::not_found("Subscription", id));
        }
        info!("Event subscription removed: {}", id);
        Ok(())
    }

    pub async fn get_subscription(&self, tenant_id: &str, id: &str) -> TmfResult<Value> {
        let row = self
            .storage
            .get(Self::prefix(tenant_id).key(id))
            .await?
            .ok_or_else(|| TmfError::not_found("Subscription", id))?;
        let subscription: Subscription = serde_json::from_value(row)?;
        Ok(subscription.to_hub())
    }

    /// Subscriptions of an API domain, newest first.
    pub async fn list_subscriptions(
        &self,
        tenant_id: &str,
        api_domain: &str,
        offset: usize,
        limit: usize,
    ) -> TmfResult<Page> {
        let query = ListQuery::new()
            .with_filter("apiDomain", api_domain)
            .with_sort("-createdAt")
            .with_page(offset, limit);

        let rows = self.storage.list(Self::prefix(tenant_id), &query).await?;
        let total = self.storage.count(Self::prefix(tenant_id), &query).await?;

        let data = rows
            .into_iter()
            .map(|row| serde_json::from_value::<Subscription>(row).map(|s| s.to_hub()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(data, total, offset, limit))
    }
}
