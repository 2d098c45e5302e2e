//! Sequential execution of a JSON Patch Query batch.

use log::{debug, info};
use serde_json::{Map, Value};

use crate::error::TmfResult;
use crate::patch::applier::{AppliedChange, PatchContext, apply};
use crate::patch::merge::merge_shallow;
use crate::patch::operation::{PatchOperation, validate_batch_for};
use crate::storage::{StorageError, StorageKey, StorageProvider};

/// Top-level attributes changed by a batch, in first-change order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    attributes: Vec<String>,
    state_changed: bool,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attribute; returns `false` if it was already recorded.
    pub fn insert(&mut self, attribute: impl Into<String>) -> bool {
        let attribute = attribute.into();
        if self.contains(&attribute) {
            return false;
        }
        self.attributes.push(attribute);
        true
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Whether any operation wrote the state field.
    pub fn state_changed(&self) -> bool {
        self.state_changed
    }

    pub fn mark_state_changed(&mut self) {
        self.state_changed = true;
    }

    fn record(&mut self, change: AppliedChange) {
        self.state_changed |= change.state_changed;
        self.insert(change.changed_attribute);
    }

    pub fn into_vec(self) -> Vec<String> {
        self.attributes
    }
}

/// Result of a successful batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    /// The working snapshot after every operation and the final touch
    pub entity: Value,
    pub changed: ChangeSet,
}

/// Validate and apply a batch against `existing`.
///
/// The whole batch is validated before the first write: shapes, paths and
/// every target against the resource definition. Once applying starts, only
/// an element selector without matches or a storage failure can stop the
/// batch, and the earlier operations stay committed.
pub async fn execute<S>(
    ctx: &PatchContext<'_, S>,
    existing: Value,
    operations: &[PatchOperation],
) -> TmfResult<PatchOutcome>
where
    S: StorageProvider<Error = StorageError>,
{
    let validated = validate_batch_for(ctx.definition, operations)?;
    debug!(
        "Executing {} patch operation(s) on {} '{}'",
        validated.len(),
        ctx.definition.type_name,
        ctx.entity_id
    );

    let mut entity = existing;
    let mut changed = ChangeSet::new();
    for operation in &validated {
        let change = apply(ctx, &mut entity, operation).await?;
        changed.record(change);
    }

    let mut touch = Map::new();
    touch.insert("lastUpdate".to_string(), Value::from(ctx.now.as_str()));
    ctx.storage
        .update(
            StorageKey::new(ctx.tenant_id, &ctx.definition.collection, ctx.entity_id),
            touch.clone(),
        )
        .await?;
    merge_shallow(&mut entity, &touch);

    info!(
        "Applied {} patch operation(s) to {} '{}' (changed: {})",
        validated.len(),
        ctx.definition.type_name,
        ctx.entity_id,
        changed.iter().collect::<Vec<_>>().join(", ")
    );

    Ok(PatchOutcome { entity, changed })
}
