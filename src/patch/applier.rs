//! Application of one validated patch operation.
//!
//! Every operation is written to storage immediately and mirrored into the
//! working snapshot, so the next operation of the batch sees its effect.
//! The snapshot is the populated entity: relation arrays hold child objects,
//! while the stored parent row holds only their ids.

use log::{debug, trace};
use serde_json::{Map, Value};

use crate::error::{TmfError, TmfResult};
use crate::patch::matcher::{js_string, match_elements};
use crate::patch::merge::{merge_shallow, nested_update};
use crate::patch::operation::{PatchOp, ValidatedOperation};
use crate::patch::path::{Locator, Selector};
use crate::resource::definition::ResourceDefinition;
use crate::resource::relation::{
    Relation, create_children, delete_children_best_effort, element_ids, relation_items,
};
use crate::resource::schema::strip_internal_fields;
use crate::resource::timestamp;
use crate::storage::{StorageError, StorageKey, StorageProvider};

/// Everything an operation needs besides the snapshot.
pub struct PatchContext<'a, S> {
    pub storage: &'a S,
    pub definition: &'a ResourceDefinition,
    pub tenant_id: &'a str,
    pub entity_id: &'a str,
    /// Timestamp stamped on every write of the batch
    pub now: String,
}

impl<'a, S> PatchContext<'a, S>
where
    S: StorageProvider<Error = StorageError>,
{
    pub fn new(
        storage: &'a S,
        definition: &'a ResourceDefinition,
        tenant_id: &'a str,
        entity_id: &'a str,
    ) -> Self {
        Self {
            storage,
            definition,
            tenant_id,
            entity_id,
            now: timestamp(),
        }
    }

    fn parent_key(&self) -> StorageKey {
        StorageKey::new(self.tenant_id, &self.definition.collection, self.entity_id)
    }

    /// Persist a partial update of the parent row.
    async fn update_parent(&self, changes: Map<String, Value>) -> TmfResult<()> {
        self.storage.update(self.parent_key(), changes).await?;
        Ok(())
    }
}

/// What one operation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    /// Top-level attribute of the entity that was written
    pub changed_attribute: String,
    /// The state field was written directly
    pub state_changed: bool,
}

impl AppliedChange {
    fn attribute(name: impl Into<String>) -> Self {
        Self {
            changed_attribute: name.into(),
            state_changed: false,
        }
    }
}

/// Apply one operation to storage and to `snapshot`.
pub async fn apply<S>(
    ctx: &PatchContext<'_, S>,
    snapshot: &mut Value,
    operation: &ValidatedOperation,
) -> TmfResult<AppliedChange>
where
    S: StorageProvider<Error = StorageError>,
{
    trace!(
        "Applying {} {} to {} '{}'",
        operation.op, operation.path, ctx.definition.type_name, ctx.entity_id
    );

    operation.check_target(ctx.definition)?;

    match &operation.locator {
        Locator::SimpleField { name, nested } => {
            apply_simple_field(ctx, snapshot, operation, name, *nested).await
        }
        locator => {
            let array = locator.array().unwrap_or_default();
            let relation = ctx.definition.relation(array)?;
            let Some(selector) = locator.selector() else {
                return Err(TmfError::invalid_path(&operation.path, "missing element selector"));
            };
            apply_to_elements(ctx, snapshot, operation, relation, selector, locator.attribute())
                .await
        }
    }
}

async fn apply_simple_field<S>(
    ctx: &PatchContext<'_, S>,
    snapshot: &mut Value,
    operation: &ValidatedOperation,
    name: &str,
    nested: bool,
) -> TmfResult<AppliedChange>
where
    S: StorageProvider<Error = StorageError>,
{
    let definition = ctx.definition;
    let top = name.split('.').next().unwrap_or(name);

    // `add` on a relation name appends new children.
    if operation.op == PatchOp::Add && !nested {
        if let Some(relation) = definition.relations.get(name) {
            return add_children(ctx, snapshot, relation, operation.value.clone()).await;
        }
    }

    if nested {
        let value = match operation.op {
            PatchOp::Remove => Value::Null,
            PatchOp::Add | PatchOp::Replace => operation.value.clone(),
        };
        let changes = nested_update(snapshot, name, &value);
        ctx.update_parent(changes.clone()).await?;
        merge_shallow(snapshot, &changes);
        return Ok(AppliedChange::attribute(top));
    }

    let mut changes = Map::new();
    let mut state_changed = false;
    let mut history_elements = None;

    match operation.op {
        PatchOp::Add | PatchOp::Replace => {
            changes.insert(name.to_string(), operation.value.clone());
            if let Some(state) = definition.state.as_ref().filter(|state| state.field == name) {
                state_changed = true;
                let state_value = js_string(Some(&operation.value));
                debug!(
                    "{} '{}' {} changed to '{}'",
                    definition.type_name, ctx.entity_id, state.field, state_value
                );

                if let Some(date_field) = state.date_field {
                    changes.insert(date_field.to_string(), Value::from(ctx.now.as_str()));
                }
                if let Some(history) = definition.history_relation() {
                    let mut entry = Map::new();
                    entry.insert(state.field.to_string(), operation.value.clone());
                    entry.insert("statusChangeDate".to_string(), Value::from(ctx.now.as_str()));
                    entry.insert(
                        "statusChangeReason".to_string(),
                        Value::from(format!("Status changed to {}", state_value)),
                    );
                    let created = create_children(
                        ctx.storage,
                        ctx.tenant_id,
                        history,
                        vec![Value::Object(entry)],
                        &ctx.now,
                    )
                    .await?;

                    let mut elements = current_elements(snapshot, &history.name);
                    elements.extend(created);
                    changes.insert(history.name.clone(), id_array(&elements));
                    history_elements = Some((history.name.clone(), elements));
                }
            }
        }
        PatchOp::Remove => {
            changes.insert(name.to_string(), Value::Null);
            state_changed = definition.state_field() == Some(name);
        }
    }

    ctx.update_parent(changes.clone()).await?;
    if let Some((relation, elements)) = history_elements {
        changes.insert(relation, Value::Array(elements));
    }
    merge_shallow(snapshot, &changes);
    Ok(AppliedChange {
        changed_attribute: name.to_string(),
        state_changed,
    })
}

/// Create children from an object or an array of objects and append them.
async fn add_children<S>(
    ctx: &PatchContext<'_, S>,
    snapshot: &mut Value,
    relation: &Relation,
    value: Value,
) -> TmfResult<AppliedChange>
where
    S: StorageProvider<Error = StorageError>,
{
    let created = create_children(
        ctx.storage,
        ctx.tenant_id,
        relation,
        relation_items(value),
        &ctx.now,
    )
    .await?;
    debug!(
        "Added {} {} element(s) to {} '{}'",
        created.len(),
        relation.name,
        ctx.definition.type_name,
        ctx.entity_id
    );

    let mut elements = current_elements(snapshot, &relation.name);
    elements.extend(created);
    persist_elements(ctx, snapshot, relation, elements).await?;
    Ok(AppliedChange::attribute(&relation.name))
}

async fn apply_to_elements<S>(
    ctx: &PatchContext<'_, S>,
    snapshot: &mut Value,
    operation: &ValidatedOperation,
    relation: &Relation,
    selector: Selector<'_>,
    attribute: Option<&str>,
) -> TmfResult<AppliedChange>
where
    S: StorageProvider<Error = StorageError>,
{
    let mut elements = current_elements(snapshot, &relation.name);
    let matches = match_elements(&elements, selector);
    if matches.is_empty() {
        return Err(TmfError::no_match(&operation.path));
    }

    match (operation.op, attribute) {
        (PatchOp::Remove, None) => {
            let removed = matches
                .iter()
                .filter_map(|&index| element_id(&elements[index]))
                .collect::<Vec<_>>();
            delete_children_best_effort(ctx.storage, ctx.tenant_id, relation, removed.clone())
                .await;

            elements.retain(|element| element_id(element).is_none_or(|id| !removed.contains(&id)));
            debug!(
                "Removed {} {} element(s) from {} '{}'",
                removed.len(),
                relation.name,
                ctx.definition.type_name,
                ctx.entity_id
            );
            persist_elements(ctx, snapshot, relation, elements).await?;
        }
        (op, attribute) => {
            for index in matches {
                let changes = match (op, attribute) {
                    (PatchOp::Remove, Some(attribute)) => {
                        nested_update(&elements[index], attribute, &Value::Null)
                    }
                    (_, Some(attribute)) => {
                        nested_update(&elements[index], attribute, &operation.value)
                    }
                    (_, None) => whole_element_changes(relation, &operation.value)?,
                };
                let updated = update_child(ctx, relation, &elements[index], changes).await?;
                elements[index] = updated;
            }
            let mut changes = Map::new();
            changes.insert(relation.name.clone(), Value::Array(elements));
            merge_shallow(snapshot, &changes);
        }
    }

    Ok(AppliedChange::attribute(&relation.name))
}

/// Changes for an operation that writes a whole element. The element keeps
/// its id.
fn whole_element_changes(relation: &Relation, value: &Value) -> TmfResult<Map<String, Value>> {
    match value {
        Value::Object(map) => {
            let mut changes = map.clone();
            changes.remove("id");
            Ok(changes)
        }
        other => Err(TmfError::validation(format!(
            "Value for an element of '{}' must be an object, got {}",
            relation.name, other
        ))),
    }
}

async fn update_child<S>(
    ctx: &PatchContext<'_, S>,
    relation: &Relation,
    element: &Value,
    changes: Map<String, Value>,
) -> TmfResult<Value>
where
    S: StorageProvider<Error = StorageError>,
{
    let id = element
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| TmfError::validation(format!("Element of '{}' has no id", relation.name)))?;

    let updated = ctx
        .storage
        .update(relation.child_key(ctx.tenant_id, id), changes)
        .await?;
    Ok(strip_internal_fields(updated))
}

/// Store the ids of `elements` on the parent and put the elements in the
/// snapshot.
async fn persist_elements<S>(
    ctx: &PatchContext<'_, S>,
    snapshot: &mut Value,
    relation: &Relation,
    elements: Vec<Value>,
) -> TmfResult<()>
where
    S: StorageProvider<Error = StorageError>,
{
    let mut changes = Map::new();
    changes.insert(relation.name.clone(), id_array(&elements));
    ctx.update_parent(changes).await?;

    let mut changes = Map::new();
    changes.insert(relation.name.clone(), Value::Array(elements));
    merge_shallow(snapshot, &changes);
    Ok(())
}

fn current_elements(snapshot: &Value, relation: &str) -> Vec<Value> {
    snapshot
        .get(relation)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn element_id(element: &Value) -> Option<String> {
    element_ids(std::slice::from_ref(element)).pop()
}

fn id_array(elements: &[Value]) -> Value {
    Value::Array(element_ids(elements).into_iter().map(Value::from).collect())
}
