//! Generic resource service.
//!
//! One [`ResourceService`] serves one resource type described by a
//! [`ResourceDefinition`]. It owns the whole request flow: validation, the
//! parent row and its relation children, optimistic locking, response
//! shaping and event publication.
//!
//! # Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tmf_server::config::ServerConfig;
//! use tmf_server::events::EventPublisher;
//! use tmf_server::patch::PatchRequest;
//! use tmf_server::resource::{RequestContext, ResourceDefinition, ResourceService};
//! use tmf_server::storage::InMemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = InMemoryStorage::new();
//! let config = ServerConfig::default();
//! let publisher = Arc::new(EventPublisher::in_memory(storage.clone(), config.webhook.clone()));
//! let tickets = ResourceService::new(
//!     ResourceDefinition::trouble_ticket(),
//!     storage,
//!     publisher,
//!     config,
//! );
//!
//! let ctx = RequestContext::for_tenant("tenant1");
//! let ticket = tickets
//!     .create(&ctx, json!({
//!         "description": "Router down",
//!         "severity": "critical",
//!         "ticketType": "incident",
//!         "note": [{"author": "Bob", "text": "Rebooted"}]
//!     }))
//!     .await?;
//! let id = ticket["id"].as_str().unwrap_or_default();
//!
//! let request = PatchRequest::from_body(json!([
//!     {"op": "replace", "path": "$.note[?(@.author=='Bob')].text", "value": "Replaced"}
//! ]))?;
//! let patched = tickets.patch(&ctx, id, request).await?;
//! assert_eq!(patched["note"][0]["text"], "Replaced");
//! # Ok(())
//! # }
//! ```

use futures::future::join_all;
use log::{debug, info, trace, warn};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{TmfError, TmfResult};
use crate::events::{
    EventBus, EventEnvelope, EventKind, EventPublisher, InMemoryEventBus, NullTransport,
    WebhookTransport,
};
use crate::patch::applier::PatchContext;
use crate::patch::matcher::js_string;
use crate::patch::merge_patch::{merge, validate_merge};
use crate::patch::{PatchRequest, execute, validate_batch_for};
use crate::resource::context::RequestContext;
use crate::resource::definition::ResourceDefinition;
use crate::resource::page::Page;
use crate::resource::relation::{
    Relation, create_children, delete_children_best_effort, element_ids, relation_items,
};
use crate::resource::schema::{map_to_schema, select_fields, strip_internal_fields};
use crate::resource::timestamp;
use crate::resource::version::{HttpVersion, RawVersion, check_if_match};
use crate::storage::{ListQuery, StorageError, StorageKey, StorageProvider, TextSearch};

const DEFAULT_SORT: &str = "-createdAt";

/// A response entity together with its ETag.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedEntity {
    pub entity: Value,
    /// `None` when the stored row carries no version token
    pub etag: Option<HttpVersion>,
}

/// Parameters of a list request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListRequest {
    /// Attribute equality filters; values compare as strings
    pub filters: Map<String, Value>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub sort: Option<String>,
    pub search: Option<String>,
    pub search_fields: Vec<String>,
    /// Response fields to keep; empty keeps all
    pub fields: Vec<String>,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(attribute.into(), value.into());
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn with_search<I, F>(mut self, term: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.search = Some(term.into());
        self.search_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Build a request from query parameters.
    ///
    /// `fields`, `offset`, `limit`, `sort`, `search` and `searchFields` are
    /// reserved; every other parameter is an equality filter. Comma separated
    /// lists are split and trimmed.
    ///
    /// ```rust
    /// use serde_json::json;
    /// use tmf_server::resource::service::ListRequest;
    ///
    /// let params = json!({"limit": "5", "status": "acknowledged", "fields": "name, status"});
    /// let request = ListRequest::from_params(params.as_object().unwrap()).unwrap();
    /// assert_eq!(request.limit, Some(5));
    /// assert_eq!(request.fields, vec!["name", "status"]);
    /// assert_eq!(request.filters["status"], "acknowledged");
    /// ```
    pub fn from_params(params: &Map<String, Value>) -> TmfResult<Self> {
        let mut request = Self::new();

        for (key, value) in params {
            match key.as_str() {
                "offset" => request.offset = Some(parse_count(key, value)?),
                "limit" => request.limit = Some(parse_count(key, value)?),
                "sort" => request.sort = Some(js_string(Some(value))),
                "search" => request.search = Some(js_string(Some(value))),
                "searchFields" => request.search_fields = split_list(value),
                "fields" => request.fields = split_list(value),
                _ => {
                    request.filters.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(request)
    }

    /// `search` and `searchFields` must be given together.
    fn text_search(&self) -> TmfResult<Option<TextSearch>> {
        let term = self.search.as_deref().map(str::trim).filter(|term| !term.is_empty());
        match (term, self.search_fields.is_empty()) {
            (None, true) => Ok(None),
            (Some(_), true) => Err(TmfError::validation(
                "searchFields parameter is required when search parameter is provided",
            )),
            (None, false) => Err(TmfError::validation(
                "search parameter is required when searchFields parameter is provided",
            )),
            (Some(term), false) => Ok(Some(TextSearch::new(term, self.search_fields.clone()))),
        }
    }
}

fn parse_count(name: &str, value: &Value) -> TmfResult<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        TmfError::validation(format!("'{}' must be a non-negative integer, got {}", name, value))
    })
}

fn split_list(value: &Value) -> Vec<String> {
    js_string(Some(value))
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// "TroubleTicket" becomes "Trouble ticket".
fn display_name(type_name: &str) -> String {
    let mut name = String::with_capacity(type_name.len() + 4);
    for (i, c) in type_name.chars().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            name.push(' ');
            name.push(c.to_ascii_lowercase());
        } else {
            name.push(c);
        }
    }
    name
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Service for one TMF resource type.
pub struct ResourceService<S, B = InMemoryEventBus, T = NullTransport> {
    definition: ResourceDefinition,
    storage: S,
    publisher: Arc<EventPublisher<S, B, T>>,
    config: ServerConfig,
}

impl<S, B, T> ResourceService<S, B, T>
where
    S: StorageProvider<Error = StorageError>,
    B: EventBus,
    T: WebhookTransport,
{
    pub fn new(
        definition: ResourceDefinition,
        storage: S,
        publisher: Arc<EventPublisher<S, B, T>>,
        config: ServerConfig,
    ) -> Self {
        Self {
            definition,
            storage,
            publisher,
            config,
        }
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    pub fn publisher(&self) -> &EventPublisher<S, B, T> {
        &self.publisher
    }

    fn key(&self, tenant_id: &str, id: &str) -> StorageKey {
        StorageKey::new(tenant_id, &self.definition.collection, id)
    }

    fn require_id(&self, id: &str) -> TmfResult<()> {
        if id.trim().is_empty() {
            return Err(TmfError::validation("ID is required"));
        }
        Ok(())
    }

    /// Stored parent row, or `NotFound`.
    async fn fetch(&self, tenant_id: &str, id: &str) -> TmfResult<Value> {
        self.storage
            .get(self.key(tenant_id, id))
            .await?
            .ok_or_else(|| TmfError::not_found(self.definition.type_name, id))
    }

    /// Replace relation id arrays by the child rows they reference.
    ///
    /// Children that no longer exist are dropped.
    async fn populate(&self, tenant_id: &str, mut row: Value) -> Value {
        let lookups = self.definition.relations.iter().filter_map(|relation| {
            let ids = element_ids(row.get(&relation.name)?.as_array()?);
            Some(async move {
                let children = join_all(
                    ids.iter()
                        .map(|id| self.storage.get(relation.child_key(tenant_id, id))),
                )
                .await;
                let children: Vec<Value> = children
                    .into_iter()
                    .filter_map(|child| match child {
                        Ok(child) => child.map(strip_internal_fields),
                        Err(e) => {
                            warn!("Failed to load {} child: {}", relation.collection, e);
                            None
                        }
                    })
                    .collect();
                (relation.name.as_str(), children)
            })
        });
        let populated = join_all(lookups).await;

        if let Value::Object(map) = &mut row {
            for (name, children) in populated {
                map.insert(name.to_string(), Value::Array(children));
            }
        }
        row
    }

    /// Populate a stored row and shape it for a response.
    async fn present(&self, tenant_id: &str, row: Value) -> Value {
        let populated = self.populate(tenant_id, row).await;
        map_to_schema(&populated, self.definition.schema_fields)
    }

    async fn emit(&self, ctx: &RequestContext, kind: EventKind, event: Value) {
        let event_type = self.definition.event_type(kind);
        let envelope = EventEnvelope::new(
            kind,
            event_type,
            self.definition.api_domain(),
            event,
            ctx.correlation_id.clone(),
        );
        let topic = format!("{}.{}", self.definition.payload_key(), kind.topic());
        self.publisher.publish(ctx.tenant_id(), &topic, &envelope).await;
    }

    /// Create a resource with its relation children.
    pub async fn create(&self, ctx: &RequestContext, payload: Value) -> TmfResult<Value> {
        let tenant_id = ctx.tenant_id();
        let definition = &self.definition;

        info!(
            "Creating {} resource for tenant '{}' (request: '{}')",
            definition.type_name, tenant_id, ctx.request_id
        );
        trace!("Create data: {}", payload);

        let Value::Object(mut payload) = payload else {
            return Err(TmfError::validation("Request body must be a JSON object"));
        };

        let missing = definition.missing_required(&payload);
        if !missing.is_empty() {
            return Err(TmfError::validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let mut children: Vec<(&Relation, Vec<Value>)> = Vec::new();
        for relation in definition.relations.iter() {
            if let Some(value) = payload.remove(&relation.name) {
                let items = relation_items(value);
                if items.iter().any(|item| !item.is_object()) {
                    return Err(TmfError::validation(format!(
                        "Items of '{}' must be objects",
                        relation.name
                    )));
                }
                children.push((relation, items));
            }
        }

        let id = match payload.remove("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        let now = timestamp();

        payload.insert("id".to_string(), Value::from(id.as_str()));
        payload.insert(
            "href".to_string(),
            Value::from(self.config.resource_href(definition.api_path, &id)),
        );
        payload.insert("creationDate".to_string(), Value::from(now.as_str()));
        payload.insert("lastUpdate".to_string(), Value::from(now.as_str()));
        if is_blank(payload.get("@type")) {
            payload.insert("@type".to_string(), Value::from(definition.type_name));
        }
        if let Some(state) = &definition.state {
            if is_blank(payload.get(state.field)) {
                payload.insert(state.field.to_string(), Value::from(state.default));
            }
            if let Some(date_field) = state.date_field {
                payload.insert(date_field.to_string(), Value::from(now.as_str()));
            }
        }

        let initial_history = definition.history_relation().and_then(|history| {
            let state = definition.state.as_ref()?;
            let reason = match payload.get("statusChangeReason") {
                Some(Value::String(reason)) if !reason.is_empty() => reason.clone(),
                _ => format!("{} created", display_name(definition.type_name)),
            };
            Some((
                history,
                json!({
                    state.field: payload.get(state.field).cloned().unwrap_or(Value::Null),
                    "statusChangeDate": now,
                    "statusChangeReason": reason,
                }),
            ))
        });

        self.storage
            .create(self.key(tenant_id, &id), Value::Object(payload))
            .await?;

        let linked = self
            .create_relations(tenant_id, &id, initial_history, children, &now)
            .await;
        let row = match linked {
            Ok(row) => row,
            Err(e) => {
                match self.storage.delete(self.key(tenant_id, &id)).await {
                    Ok(_) => debug!("Removed partially created {} '{}'", definition.type_name, id),
                    Err(cleanup) => warn!(
                        "Failed to clean up partially created {} '{}' for tenant '{}': {}",
                        definition.type_name, id, tenant_id, cleanup
                    ),
                }
                return Err(e);
            }
        };

        let entity = self.present(tenant_id, row).await;
        let mut event = Map::new();
        event.insert(definition.payload_key(), entity.clone());
        self.emit(ctx, EventKind::Create, Value::Object(event)).await;

        debug!(
            "Successfully created {} '{}' for tenant '{}'",
            definition.type_name, id, tenant_id
        );
        Ok(entity)
    }

    /// Create the children of a new resource and store their ids on it.
    async fn create_relations(
        &self,
        tenant_id: &str,
        id: &str,
        initial_history: Option<(&Relation, Value)>,
        children: Vec<(&Relation, Vec<Value>)>,
        now: &str,
    ) -> TmfResult<Value> {
        let mut changes = Map::new();

        if let Some((history, entry)) = initial_history {
            let created = create_children(&self.storage, tenant_id, history, vec![entry], now).await?;
            changes.insert(history.name.clone(), json!(element_ids(&created)));
        }

        for (relation, items) in children {
            if items.is_empty() {
                continue;
            }
            let created = create_children(&self.storage, tenant_id, relation, items, now).await?;
            let mut ids = match changes.get(&relation.name) {
                Some(Value::Array(existing)) => element_ids(existing),
                _ => Vec::new(),
            };
            ids.extend(element_ids(&created));
            changes.insert(relation.name.clone(), json!(ids));
        }

        if changes.is_empty() {
            return self.fetch(tenant_id, id).await;
        }
        Ok(self.storage.update(self.key(tenant_id, id), changes).await?)
    }

    /// Retrieve a resource and its ETag.
    ///
    /// A non-empty `fields` restricts the response to those fields.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        id: &str,
        fields: &[String],
    ) -> TmfResult<VersionedEntity> {
        let tenant_id = ctx.tenant_id();
        debug!(
            "Getting {} resource with ID '{}' for tenant '{}' (request: '{}')",
            self.definition.type_name, id, tenant_id, ctx.request_id
        );
        self.require_id(id)?;

        let row = self.fetch(tenant_id, id).await?;
        let etag = RawVersion::from_record(&row).map(HttpVersion::from);
        let mut entity = self.present(tenant_id, row).await;
        if !fields.is_empty() {
            entity = select_fields(&entity, fields);
        }

        Ok(VersionedEntity { entity, etag })
    }

    /// List resources of the tenant.
    pub async fn list(&self, ctx: &RequestContext, request: &ListRequest) -> TmfResult<Page> {
        let tenant_id = ctx.tenant_id();
        debug!(
            "Listing {} resources for tenant '{}' (request: '{}')",
            self.definition.type_name, tenant_id, ctx.request_id
        );

        let offset = request.offset.unwrap_or(0);
        let limit = self.config.page_size(request.limit);
        let mut query = ListQuery {
            filters: request.filters.clone(),
            ..ListQuery::new()
        }
        .with_page(offset, limit)
        .with_sort(request.sort.as_deref().unwrap_or(DEFAULT_SORT));
        if let Some(search) = request.text_search()? {
            query = query.with_search(search);
        }

        let prefix = StorageKey::prefix(tenant_id, &self.definition.collection);
        let rows = self.storage.list(prefix.clone(), &query).await?;
        let total = self.storage.count(prefix, &query).await?;

        let data = join_all(rows.into_iter().map(|row| self.present(tenant_id, row)))
            .await
            .into_iter()
            .map(|entity| {
                if request.fields.is_empty() {
                    entity
                } else {
                    select_fields(&entity, &request.fields)
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "Found {} of {} {} resources for tenant '{}'",
            data.len(),
            total,
            self.definition.type_name,
            tenant_id
        );
        Ok(Page::new(data, total, offset, limit))
    }

    /// Apply a JSON Patch Query or a merge patch.
    ///
    /// The request is validated before the resource is read, and the
    /// `If-Match` tag is checked before anything is written.
    pub async fn patch(
        &self,
        ctx: &RequestContext,
        id: &str,
        request: PatchRequest,
    ) -> TmfResult<Value> {
        let tenant_id = ctx.tenant_id();
        let definition = &self.definition;

        info!(
            "Patching {} resource with ID '{}' for tenant '{}' (request: '{}')",
            definition.type_name, id, tenant_id, ctx.request_id
        );
        self.require_id(id)?;

        match &request {
            PatchRequest::Query(operations) => {
                validate_batch_for(definition, operations)?;
            }
            PatchRequest::Merge(updates) => validate_merge(definition, updates)?,
        }

        let existing = self.fetch(tenant_id, id).await?;
        check_if_match(ctx.if_match.as_ref(), &existing)?;

        let original_state = definition
            .state_field()
            .map(|field| js_string(existing.get(field)));
        let patch_ctx = PatchContext::new(&self.storage, definition, tenant_id, id);

        let outcome = match request {
            PatchRequest::Query(operations) => {
                let snapshot = self.populate(tenant_id, existing).await;
                execute(&patch_ctx, snapshot, &operations).await?
            }
            PatchRequest::Merge(updates) => merge(&patch_ctx, &existing, updates).await?,
        };

        let updated = self.fetch(tenant_id, id).await?;
        let final_state = definition
            .state_field()
            .map(|field| js_string(updated.get(field)));
        let kind = if outcome.changed.state_changed() && final_state != original_state {
            EventKind::StateChange
        } else {
            EventKind::AttributeValueChange
        };

        let entity = self.present(tenant_id, updated).await;
        let mut event = Map::new();
        event.insert(definition.payload_key(), entity.clone());
        event.insert(
            "changedAttributes".to_string(),
            json!(outcome.changed.into_vec()),
        );
        self.emit(ctx, kind, Value::Object(event)).await;

        Ok(entity)
    }

    /// Delete a resource and, best effort, its relation children.
    pub async fn remove(&self, ctx: &RequestContext, id: &str) -> TmfResult<()> {
        let tenant_id = ctx.tenant_id();
        let definition = &self.definition;

        info!(
            "Deleting {} resource with ID '{}' for tenant '{}' (request: '{}')",
            definition.type_name, id, tenant_id, ctx.request_id
        );
        self.require_id(id)?;

        let existing = self.fetch(tenant_id, id).await?;
        for relation in definition.relations.iter() {
            if let Some(ids) = existing.get(&relation.name).and_then(Value::as_array) {
                delete_children_best_effort(&self.storage, tenant_id, relation, element_ids(ids))
                    .await;
            }
        }

        if !self.storage.delete(self.key(tenant_id, id)).await? {
            return Err(TmfError::not_found(definition.type_name, id));
        }

        let href = existing
            .get("href")
            .cloned()
            .unwrap_or_else(|| Value::from(self.config.resource_href(definition.api_path, id)));
        let mut event = Map::new();
        event.insert(
            definition.payload_key(),
            json!({"id": id, "href": href, "@type": definition.type_name}),
        );
        self.emit(ctx, EventKind::Delete, Value::Object(event)).await;

        debug!(
            "Successfully deleted {} resource with ID '{}' for tenant '{}'",
            definition.type_name, id, tenant_id
        );
        Ok(())
    }
}
