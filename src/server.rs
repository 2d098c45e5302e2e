//! TMF server with runtime resource type registration.
//!
//! [`TmfServer`] owns one [`ResourceService`] per registered resource type and
//! the shared [`EventPublisher`]. Operations are dispatched by resource type
//! name, so an outer HTTP layer only needs to map routes to type names.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use serde_json::Value;

use crate::config::ServerConfig;
use crate::error::{TmfError, TmfResult};
use crate::events::{
    EventBus, EventPublisher, InMemoryEventBus, NullTransport, WebhookTransport,
};
use crate::patch::PatchRequest;
use crate::resource::{
    ListRequest, Page, RequestContext, ResourceDefinition, ResourceService, VersionedEntity,
};
use crate::storage::{StorageError, StorageProvider};

/// Dispatches resource operations to the registered resource services.
pub struct TmfServer<S, B = InMemoryEventBus, T = NullTransport> {
    storage: S,
    publisher: Arc<EventPublisher<S, B, T>>,
    services: HashMap<&'static str, ResourceService<S, B, T>>,
    config: ServerConfig,
}

impl<S> TmfServer<S, InMemoryEventBus, NullTransport>
where
    S: StorageProvider<Error = StorageError> + Clone,
{
    /// Server for all built-in resources with an in-memory event bus and no
    /// webhook delivery.
    pub fn in_memory(storage: S, config: ServerConfig) -> Self {
        Self::new(storage, InMemoryEventBus::new(), NullTransport, config)
    }
}

impl<S, B, T> TmfServer<S, B, T>
where
    S: StorageProvider<Error = StorageError> + Clone,
    B: EventBus,
    T: WebhookTransport,
{
    /// Create a server with every built-in resource type registered.
    pub fn new(storage: S, bus: B, transport: T, config: ServerConfig) -> Self {
        let publisher = Arc::new(EventPublisher::new(
            storage.clone(),
            bus,
            transport,
            config.webhook.clone(),
        ));
        let mut server = Self::empty(storage, publisher, config);
        for definition in ResourceDefinition::all() {
            server.register_resource_type(definition);
        }
        server
    }

    /// Create a server with no resource types registered.
    pub fn empty(storage: S, publisher: Arc<EventPublisher<S, B, T>>, config: ServerConfig) -> Self {
        Self {
            storage,
            publisher,
            services: HashMap::new(),
            config,
        }
    }

    /// Register a resource type, replacing any previous registration.
    pub fn register_resource_type(&mut self, definition: ResourceDefinition) {
        let type_name = definition.type_name;
        info!(
            "Registering resource type {} at {}",
            type_name, definition.api_path
        );
        let service = ResourceService::new(
            definition,
            self.storage.clone(),
            Arc::clone(&self.publisher),
            self.config.clone(),
        );
        self.services.insert(type_name, service);
    }

    /// Registered resource type names, sorted.
    pub fn get_supported_resource_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.services.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Service of a registered resource type.
    pub fn resource(&self, resource_type: &str) -> TmfResult<&ResourceService<S, B, T>> {
        self.services.get(resource_type).ok_or_else(|| {
            TmfError::validation(format!("Unsupported resource type: {}", resource_type))
        })
    }

    pub fn publisher(&self) -> &EventPublisher<S, B, T> {
        &self.publisher
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn create_resource(
        &self,
        resource_type: &str,
        data: Value,
        context: &RequestContext,
    ) -> TmfResult<Value> {
        self.resource(resource_type)?.create(context, data).await
    }

    pub async fn get_resource(
        &self,
        resource_type: &str,
        id: &str,
        fields: &[String],
        context: &RequestContext,
    ) -> TmfResult<VersionedEntity> {
        self.resource(resource_type)?.get(context, id, fields).await
    }

    pub async fn list_resources(
        &self,
        resource_type: &str,
        request: &ListRequest,
        context: &RequestContext,
    ) -> TmfResult<Page> {
        self.resource(resource_type)?.list(context, request).await
    }

    /// Patch a resource from a raw request body.
    pub async fn patch_resource(
        &self,
        resource_type: &str,
        id: &str,
        body: Value,
        context: &RequestContext,
    ) -> TmfResult<Value> {
        let service = self.resource(resource_type)?;
        service
            .patch(context, id, PatchRequest::from_body(body)?)
            .await
    }

    pub async fn delete_resource(
        &self,
        resource_type: &str,
        id: &str,
        context: &RequestContext,
    ) -> TmfResult<()> {
        self.resource(resource_type)?.remove(context, id).await
    }
}
