//! Shared helpers for the integration tests.
//!
//! Provides logger setup, a storage wrapper that counts writes, and fixtures
//! for the built-in resources.

#![allow(dead_code)]

use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tmf_server::config::{ServerConfig, WebhookConfig};
use tmf_server::storage::{
    InMemoryStorage, ListQuery, StorageError, StorageKey, StoragePrefix, StorageProvider,
};

pub const TENANT: &str = "tenant1";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory storage that counts create, update and delete calls.
#[derive(Clone, Default)]
pub struct RecordingStorage {
    inner: InMemoryStorage,
    writes: Arc<AtomicUsize>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_writes(&self) {
        self.writes.store(0, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl StorageProvider for RecordingStorage {
    type Error = StorageError;

    async fn get(&self, key: StorageKey) -> Result<Option<Value>, Self::Error> {
        self.inner.get(key).await
    }

    async fn create(&self, key: StorageKey, data: Value) -> Result<Value, Self::Error> {
        self.record_write();
        self.inner.create(key, data).await
    }

    async fn update(
        &self,
        key: StorageKey,
        changes: Map<String, Value>,
    ) -> Result<Value, Self::Error> {
        self.record_write();
        self.inner.update(key, changes).await
    }

    async fn delete(&self, key: StorageKey) -> Result<bool, Self::Error> {
        self.record_write();
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: StoragePrefix, query: &ListQuery) -> Result<Vec<Value>, Self::Error> {
        self.inner.list(prefix, query).await
    }

    async fn count(&self, prefix: StoragePrefix, query: &ListQuery) -> Result<usize, Self::Error> {
        self.inner.count(prefix, query).await
    }

    async fn find_by_attribute(
        &self,
        prefix: StoragePrefix,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<Value>, Self::Error> {
        self.inner.find_by_attribute(prefix, attribute, value).await
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        self.inner.clear().await
    }
}

/// Configuration with a fixed base URL and webhook retries that do not sleep.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        webhook: WebhookConfig {
            max_retries: 3,
            retry_delay_ms: 0,
            request_timeout_ms: 1000,
        },
        ..ServerConfig::default().with_base_url("https://api.example.com")
    }
}

pub fn trouble_ticket() -> Value {
    json!({
        "name": "Broadband outage",
        "description": "No sync on the line",
        "severity": "major",
        "ticketType": "incident",
        "note": [
            {"author": "Alice", "text": "Customer called"},
            {"author": "Bob", "text": "Line test failed"}
        ],
        "relatedParty": [
            {"role": "customer", "partyOrPartyRole": {"id": "p1", "name": "Jane"}},
            {"role": "technician", "partyOrPartyRole": {"id": "p2", "name": "Sam"}}
        ]
    })
}

pub fn product_order() -> Value {
    json!({
        "description": "New fibre line",
        "priority": "1",
        "productOrderItem": [
            {"action": "add", "quantity": 1, "productOffering": {"id": "po1", "name": "Fibre 500"}},
            {"action": "add", "quantity": 3, "productOffering": {"id": "po2", "name": "Router"}}
        ],
        "relatedParty": [
            {"role": "customer", "partyOrPartyRole": {"id": "c1", "name": "Jane"}}
        ]
    })
}

pub fn id_of(entity: &Value) -> String {
    entity["id"].as_str().unwrap_or_default().to_string()
}
