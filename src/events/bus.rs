//! Internal event bus.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::events::{EventEnvelope, EventError};

/// In-process delivery of published events.
pub trait EventBus: Send + Sync {
    /// Emit an envelope on a topic such as `troubleTicket.created`.
    fn emit(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> impl Future<Output = Result<(), EventError>> + Send;
}

/// Event bus that keeps every emitted event in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    events: Arc<RwLock<Vec<(String, EventEnvelope)>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitted `(topic, envelope)` pairs, oldest first.
    pub async fn published(&self) -> Vec<(String, EventEnvelope)> {
        self.events.read().await.clone()
    }

    /// Event types emitted so far, oldest first.
    pub async fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .map(|(_, envelope)| envelope.event_type.clone())
            .collect()
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

impl EventBus for InMemoryEventBus {
    async fn emit(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), EventError> {
        self.events
            .write()
            .await
            .push((topic.to_string(), envelope.clone()));
        Ok(())
    }
}
