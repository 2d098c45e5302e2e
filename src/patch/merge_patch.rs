//! Merge-patch mode: a partial entity instead of an operation list.
//!
//! Scalar fields are written as given. Relation arrays are merged by element
//! id: known ids are updated in place, other items become new children, and
//! existing children the payload did not mention are kept after the processed
//! ones.

use log::{debug, info};
use serde_json::{Map, Value};

use crate::error::{TmfError, TmfResult};
use crate::patch::applier::PatchContext;
use crate::patch::executor::{ChangeSet, PatchOutcome};
use crate::patch::matcher::js_string;
use crate::resource::definition::ResourceDefinition;
use crate::resource::relation::{Relation, create_children, element_ids};
use crate::storage::{StorageError, StorageKey, StorageProvider};

/// Reject read-only fields and malformed relation payloads.
///
/// `id` and the state history relation are ignored rather than rejected; the
/// entity id comes from the request and history is only written by state
/// changes.
pub fn validate_merge(
    definition: &ResourceDefinition,
    updates: &Map<String, Value>,
) -> TmfResult<()> {
    let read_only: Vec<&str> = updates
        .keys()
        .map(String::as_str)
        .filter(|key| *key != "id" && ResourceDefinition::is_read_only(key))
        .collect();
    if !read_only.is_empty() {
        return Err(TmfError::validation(format!(
            "Cannot update non-patchable fields: {}",
            read_only.join(", ")
        )));
    }

    let history = definition.history_relation().map(|history| history.name.as_str());
    for relation in definition.relations.iter() {
        if Some(relation.name.as_str()) == history {
            continue;
        }
        match updates.get(&relation.name) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                if items.iter().any(|item| !item.is_object()) {
                    return Err(TmfError::validation(format!(
                        "Items of '{}' must be objects",
                        relation.name
                    )));
                }
            }
            Some(_) => {
                return Err(TmfError::validation(format!(
                    "'{}' must be an array",
                    relation.name
                )));
            }
        }
    }

    Ok(())
}

/// Merge `updates` into the stored row `existing`.
///
/// Returns the stored row after the write; relation arrays hold ids.
pub async fn merge<S>(
    ctx: &PatchContext<'_, S>,
    existing: &Value,
    mut updates: Map<String, Value>,
) -> TmfResult<PatchOutcome>
where
    S: StorageProvider<Error = StorageError>,
{
    let definition = ctx.definition;
    validate_merge(definition, &updates)?;
    updates.remove("id");
    if let Some(history) = definition.history_relation() {
        if updates.remove(&history.name).is_some() {
            debug!(
                "Ignoring client-supplied {} for {} '{}'",
                history.name, definition.type_name, ctx.entity_id
            );
        }
    }

    let mut changed = ChangeSet::new();
    for key in updates.keys() {
        changed.insert(key.as_str());
    }

    for relation in definition.relations.iter() {
        let Some(Value::Array(items)) = updates.remove(&relation.name) else {
            continue;
        };
        let existing_ids = stored_ids(existing, &relation.name);
        let merged = merge_relation(ctx, relation, &existing_ids, items).await?;
        updates.insert(
            relation.name.clone(),
            Value::Array(merged.into_iter().map(Value::from).collect()),
        );
    }

    if let Some(state) = &definition.state {
        let requested = updates.get(state.field).filter(|value| {
            !value.is_null() && value.as_str() != Some("")
        });
        let previous = js_string(existing.get(state.field));

        if let Some(requested) = requested.filter(|value| js_string(Some(value)) != previous) {
            let state_value = js_string(Some(requested));
            changed.mark_state_changed();
            debug!(
                "{} '{}' {} changed from '{}' to '{}'",
                definition.type_name, ctx.entity_id, state.field, previous, state_value
            );

            if let Some(history) = definition.history_relation() {
                let reason = match updates.get("statusChangeReason") {
                    Some(Value::String(reason)) if !reason.is_empty() => reason.clone(),
                    _ => format!("Status changed to {}", state_value),
                };
                let mut entry = Map::new();
                entry.insert(state.field.to_string(), requested.clone());
                entry.insert("statusChangeDate".to_string(), Value::from(ctx.now.as_str()));
                entry.insert("statusChangeReason".to_string(), Value::from(reason));

                let created = create_children(
                    ctx.storage,
                    ctx.tenant_id,
                    history,
                    vec![Value::Object(entry)],
                    &ctx.now,
                )
                .await?;

                let mut ids = stored_ids(existing, &history.name);
                ids.extend(element_ids(&created));
                updates.insert(
                    history.name.clone(),
                    Value::Array(ids.into_iter().map(Value::from).collect()),
                );
                changed.insert(history.name.as_str());
            }

            if let Some(date_field) = state.date_field {
                updates.insert(date_field.to_string(), Value::from(ctx.now.as_str()));
            }
        }
    }

    updates.insert("lastUpdate".to_string(), Value::from(ctx.now.as_str()));
    let updated = ctx
        .storage
        .update(
            StorageKey::new(ctx.tenant_id, &definition.collection, ctx.entity_id),
            updates,
        )
        .await?;

    info!(
        "Merged {} attribute(s) into {} '{}'",
        changed.len(),
        definition.type_name,
        ctx.entity_id
    );

    Ok(PatchOutcome {
        entity: updated,
        changed,
    })
}

fn stored_ids(existing: &Value, relation: &str) -> Vec<String> {
    existing
        .get(relation)
        .and_then(Value::as_array)
        .map(|ids| element_ids(ids))
        .unwrap_or_default()
}

async fn merge_relation<S>(
    ctx: &PatchContext<'_, S>,
    relation: &Relation,
    existing_ids: &[String],
    items: Vec<Value>,
) -> TmfResult<Vec<String>>
where
    S: StorageProvider<Error = StorageError>,
{
    let mut merged: Vec<String> = Vec::with_capacity(items.len() + existing_ids.len());

    for item in items {
        let known_id = item
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| existing_ids.iter().any(|existing| existing == id))
            .map(str::to_string);

        match (known_id, item) {
            (Some(id), Value::Object(mut changes)) => {
                changes.remove("id");
                ctx.storage
                    .update(relation.child_key(ctx.tenant_id, &id), changes)
                    .await?;
                merged.push(id);
            }
            (_, item) => {
                let created =
                    create_children(ctx.storage, ctx.tenant_id, relation, vec![item], &ctx.now)
                        .await?;
                merged.extend(element_ids(&created));
            }
        }
    }

    for id in existing_ids {
        if !merged.contains(id) {
            merged.push(id.clone());
        }
    }

    debug!(
        "Merged {} into {} {} element(s)",
        relation.name,
        merged.len(),
        relation.collection
    );
    Ok(merged)
}
