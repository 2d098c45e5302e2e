//! Patch operations and batch validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{TmfError, TmfResult};
use crate::patch::path::{Locator, parse_path};
use crate::resource::definition::ResourceDefinition;

/// Patch operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
            PatchOp::Replace => "replace",
        }
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchOp {
    type Err = TmfError;

    fn from_str(op: &str) -> Result<Self, Self::Err> {
        match op {
            "add" => Ok(PatchOp::Add),
            "remove" => Ok(PatchOp::Remove),
            "replace" => Ok(PatchOp::Replace),
            "" => Err(TmfError::validation("Each operation must have an 'op' field")),
            other => Err(TmfError::validation(format!(
                "Unsupported operation: {}. Supported: add, remove, replace",
                other
            ))),
        }
    }
}

/// One operation of a JSON Patch Query batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }

    /// Read an operation from a request body element.
    ///
    /// Reports a missing or unknown `op`, a missing `path` and a missing
    /// `value` as validation errors rather than JSON errors. A `value` that is
    /// present but `null` counts as given.
    pub fn from_value(item: &Value) -> TmfResult<Self> {
        let Value::Object(fields) = item else {
            return Err(TmfError::validation("Each operation must be an object"));
        };

        let op = match fields.get("op") {
            None | Some(Value::Null) => "",
            Some(Value::String(op)) => op.as_str(),
            Some(other) => {
                return Err(TmfError::validation(format!(
                    "Unsupported operation: {}. Supported: add, remove, replace",
                    other
                )));
            }
        };
        let op: PatchOp = op.parse()?;

        let path = match fields.get("path") {
            Some(Value::String(path)) => path.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        };

        let operation = Self {
            op,
            path,
            value: fields.get("value").cloned(),
        };
        operation.check_shape()?;
        Ok(operation)
    }

    fn check_shape(&self) -> TmfResult<()> {
        if self.path.is_empty() {
            return Err(TmfError::validation("Each operation must have a 'path' field"));
        }
        if self.op != PatchOp::Remove && self.value.is_none() {
            return Err(TmfError::validation(format!(
                "Operation '{}' requires a 'value' field",
                self.op
            )));
        }
        Ok(())
    }
}

/// An operation whose shape was checked and whose path was parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOperation {
    pub op: PatchOp,
    pub path: String,
    pub locator: Locator,
    /// The operation's value; `null` for removes.
    pub value: Value,
}

impl ValidatedOperation {
    /// Check the operation's target against `definition` without touching
    /// storage: patchable fields, known relations, nested field rules and
    /// the shape of whole-element values.
    pub fn check_target(&self, definition: &ResourceDefinition) -> TmfResult<()> {
        match &self.locator {
            Locator::SimpleField { name, nested } => {
                // `add` on a relation name creates children.
                if self.op == PatchOp::Add && !nested && definition.relations.get(name).is_some() {
                    return Ok(());
                }
                definition.check_patchable(name.split('.').next().unwrap_or(name))
            }
            locator => {
                let array = locator.array().unwrap_or_default();
                let relation = definition.relation(array)?;
                match locator.attribute() {
                    Some(attribute) => definition.check_nested_attribute(attribute),
                    None if self.op == PatchOp::Remove || self.value.is_object() => Ok(()),
                    None => Err(TmfError::validation(format!(
                        "Value for an element of '{}' must be an object, got {}",
                        relation.name, self.value
                    ))),
                }
            }
        }
    }
}

/// Check every operation of a batch and parse every path.
///
/// Nothing is applied unless the whole batch passes, so the first invalid
/// operation fails the batch before any write.
pub fn validate_batch(operations: &[PatchOperation]) -> TmfResult<Vec<ValidatedOperation>> {
    operations
        .iter()
        .map(|operation| {
            operation.check_shape()?;
            Ok(ValidatedOperation {
                op: operation.op,
                path: operation.path.clone(),
                locator: parse_path(&operation.path)?,
                value: operation.value.clone().unwrap_or(Value::Null),
            })
        })
        .collect()
}

/// [`validate_batch`], then [`ValidatedOperation::check_target`] for every
/// operation.
pub fn validate_batch_for(
    definition: &ResourceDefinition,
    operations: &[PatchOperation],
) -> TmfResult<Vec<ValidatedOperation>> {
    let validated = validate_batch(operations)?;
    for operation in &validated {
        operation.check_target(definition)?;
    }
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_op_parsing() {
        assert_eq!("add".parse::<PatchOp>().unwrap(), PatchOp::Add);
        assert_eq!("replace".parse::<PatchOp>().unwrap(), PatchOp::Replace);
        assert!(matches!(
            "move".parse::<PatchOp>(),
            Err(TmfError::Validation { ref message }) if message.contains("Unsupported operation: move")
        ));
        assert!("".parse::<PatchOp>().is_err());
    }

    #[test]
    fn test_deserialize() {
        let operation: PatchOperation =
            serde_json::from_value(json!({"op": "remove", "path": "$.note[0]"})).unwrap();
        assert_eq!(operation, PatchOperation::remove("$.note[0]"));
        assert!(serde_json::from_value::<PatchOperation>(json!({"op": "copy", "path": "/a"})).is_err());
    }

    #[test]
    fn test_from_value_messages() {
        let missing_op = PatchOperation::from_value(&json!({"path": "/status"})).unwrap_err();
        assert_eq!(
            missing_op.to_string(),
            "Validation error: Each operation must have an 'op' field"
        );

        let missing_path = PatchOperation::from_value(&json!({"op": "remove"})).unwrap_err();
        assert!(missing_path.to_string().contains("'path'"));

        let missing_value =
            PatchOperation::from_value(&json!({"op": "replace", "path": "/status"})).unwrap_err();
        assert!(missing_value.to_string().contains("Operation 'replace' requires a 'value' field"));

        let null_value =
            PatchOperation::from_value(&json!({"op": "add", "path": "/name", "value": null})).unwrap();
        assert_eq!(null_value.value, Some(Value::Null));
    }

    #[test]
    fn test_validate_batch_parses_every_path() {
        let batch = vec![
            PatchOperation::replace("/status", json!("inProgress")),
            PatchOperation::remove("$.note[?(@.id=='n1')]"),
        ];
        let validated = validate_batch(&batch).unwrap();
        assert_eq!(validated.len(), 2);
        assert_eq!(validated[0].locator.top_level(), "status");
        assert_eq!(validated[1].value, Value::Null);

        let bad = vec![
            PatchOperation::replace("/status", json!("x")),
            PatchOperation::remove("note[0"),
        ];
        assert!(matches!(validate_batch(&bad), Err(TmfError::InvalidPath { .. })));
        assert!(validate_batch(&[]).unwrap().is_empty());

        let remove_with_value = PatchOperation::from_value(
            &json!({"op": "remove", "path": "$.priority", "value": "ignored"}),
        )
        .unwrap();
        let validated = validate_batch(&[remove_with_value]).unwrap();
        assert_eq!(validated[0].op, PatchOp::Remove);
        assert_eq!(validated[0].locator.top_level(), "priority");
    }

    #[test]
    fn test_validate_batch_for_checks_every_target() {
        let ticket = ResourceDefinition::trouble_ticket();
        let ok = vec![
            PatchOperation::add("$.note", json!({"text": "x"})),
            PatchOperation::replace("$.note[0]", json!({"text": "y"})),
            PatchOperation::remove("$.relatedParty[?(@.role=='customer')]"),
        ];
        assert_eq!(validate_batch_for(&ticket, &ok).unwrap().len(), 3);

        let late_non_patchable = vec![
            PatchOperation::replace("$.name", json!("Renamed")),
            PatchOperation::replace("$.creationDate", json!("x")),
        ];
        assert!(matches!(
            validate_batch_for(&ticket, &late_non_patchable),
            Err(TmfError::NonPatchableField { ref field, .. }) if field == "creationDate"
        ));

        let unknown_relation = vec![PatchOperation::remove("$.widgets[0]")];
        assert!(matches!(
            validate_batch_for(&ticket, &unknown_relation),
            Err(TmfError::UnknownRelation { .. })
        ));

        let scalar_element = vec![PatchOperation::replace("$.note[0]", json!("plain text"))];
        assert!(matches!(
            validate_batch_for(&ticket, &scalar_element),
            Err(TmfError::Validation { .. })
        ));

        let order = ResourceDefinition::product_order();
        let read_only_nested = vec![PatchOperation::replace(
            "$.relatedParty[0].partyOrPartyRole.id",
            json!("c9"),
        )];
        assert!(matches!(
            validate_batch_for(&order, &read_only_nested),
            Err(TmfError::NonPatchableField { .. })
        ));
    }
}
