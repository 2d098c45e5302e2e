//! Related-entity arrays of a resource.
//!
//! A relation is a camelCase array attribute of a resource whose elements are
//! stored as rows of their own collection. The parent keeps only the child
//! ids; reads populate them back into objects.

use log::{debug, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{TmfError, TmfResult};
use crate::resource::schema::strip_internal_fields;
use crate::storage::{StorageError, StorageKey, StorageProvider};

/// Prepares a new child row from its payload.
///
/// Receives the relation, the client payload and the current timestamp and
/// returns the row to store (without its id).
pub type ChildFactory = fn(&Relation, Map<String, Value>, &str) -> Map<String, Value>;

/// One relation array of a resource.
#[derive(Debug, Clone)]
pub struct Relation {
    /// Attribute name on the parent, e.g. `relatedParty`
    pub name: String,
    /// Storage collection of the child rows, e.g. `related_party`
    pub collection: String,
    /// Default `@type` of new children
    pub type_name: &'static str,
    pub factory: ChildFactory,
}

impl Relation {
    pub fn new(name: &str, type_name: &'static str, factory: ChildFactory) -> Self {
        Self {
            name: name.to_string(),
            collection: to_snake_case(name),
            type_name,
            factory,
        }
    }

    /// Key of a child row of this relation.
    pub fn child_key(&self, tenant_id: &str, id: &str) -> StorageKey {
        StorageKey::new(tenant_id, &self.collection, id)
    }

    /// Run the factory on a payload.
    pub fn prepare(&self, payload: Map<String, Value>, now: &str) -> Map<String, Value> {
        (self.factory)(self, payload, now)
    }
}

/// Convert a camelCase attribute name to its snake_case collection name.
///
/// ```rust
/// use tmf_server::resource::relation::to_snake_case;
///
/// assert_eq!(to_snake_case("relatedParty"), "related_party");
/// assert_eq!(to_snake_case("statusChangeHistory"), "status_change_history");
/// assert_eq!(to_snake_case("note"), "note");
/// ```
pub fn to_snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            snake.push('_');
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }
    snake
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Factory that only defaults `@type`.
pub fn typed_child(relation: &Relation, mut payload: Map<String, Value>, _now: &str) -> Map<String, Value> {
    if is_blank(payload.get("@type")) {
        payload.insert("@type".to_string(), Value::from(relation.type_name));
    }
    payload
}

/// Factory for notes: defaults `@type` and `date`.
pub fn note_child(relation: &Relation, payload: Map<String, Value>, now: &str) -> Map<String, Value> {
    let mut payload = typed_child(relation, payload, now);
    if is_blank(payload.get("date")) {
        payload.insert("date".to_string(), Value::from(now));
    }
    payload
}

/// Factory for status history entries: defaults `@type` and `statusChangeDate`.
pub fn status_change_child(
    relation: &Relation,
    payload: Map<String, Value>,
    now: &str,
) -> Map<String, Value> {
    let mut payload = typed_child(relation, payload, now);
    if is_blank(payload.get("statusChangeDate")) {
        payload.insert("statusChangeDate".to_string(), Value::from(now));
    }
    payload
}

/// The relation arrays of one resource type, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RelationMap {
    relations: Vec<Relation>,
}

impl RelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a relation built by [`Relation::new`].
    pub fn with(mut self, name: &str, type_name: &'static str, factory: ChildFactory) -> Self {
        self.relations.push(Relation::new(name, type_name, factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(|relation| relation.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Items of a relation payload: an array is taken element-wise, anything
/// else as a single item.
pub fn relation_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

/// Create one child row per item and return the stored children.
///
/// Every child gets a freshly generated id; ids in the payload are ignored.
/// Items that are not objects are rejected before anything is written.
pub async fn create_children<S>(
    storage: &S,
    tenant_id: &str,
    relation: &Relation,
    items: Vec<Value>,
    now: &str,
) -> TmfResult<Vec<Value>>
where
    S: StorageProvider<Error = StorageError>,
{
    let payloads = items
        .into_iter()
        .map(|item| match item {
            Value::Object(mut payload) => {
                payload.remove("id");
                Ok(payload)
            }
            other => Err(TmfError::validation(format!(
                "Items of '{}' must be objects, got {}",
                relation.name, other
            ))),
        })
        .collect::<TmfResult<Vec<_>>>()?;

    let mut created = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let id = Uuid::new_v4().to_string();
        let mut row = relation.prepare(payload, now);
        row.insert("id".to_string(), Value::from(id.as_str()));

        let stored = storage
            .create(relation.child_key(tenant_id, &id), Value::Object(row))
            .await?;
        debug!(
            "Created {} child '{}' for tenant '{}'",
            relation.collection, id, tenant_id
        );
        created.push(strip_internal_fields(stored));
    }

    Ok(created)
}

/// Delete child rows, logging and skipping failures.
pub async fn delete_children_best_effort<S>(
    storage: &S,
    tenant_id: &str,
    relation: &Relation,
    ids: impl IntoIterator<Item = String>,
) where
    S: StorageProvider<Error = StorageError>,
{
    for id in ids {
        match storage.delete(relation.child_key(tenant_id, &id)).await {
            Ok(true) => debug!("Deleted {} child '{}'", relation.collection, id),
            Ok(false) => debug!("{} child '{}' was already gone", relation.collection, id),
            Err(e) => warn!(
                "Failed to delete {} child '{}' for tenant '{}': {}",
                relation.collection, id, tenant_id, e
            ),
        }
    }
}

/// Ids held by a relation array, whether it holds ids or populated children.
pub fn element_ids(elements: &[Value]) -> Vec<String> {
    elements
        .iter()
        .filter_map(|element| match element {
            Value::String(id) => Some(id.clone()),
            Value::Object(child) => child.get("id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect()
}
