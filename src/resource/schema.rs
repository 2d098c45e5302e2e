//! Response shaping: schema projection and cleanup.
//!
//! Stored rows carry bookkeeping attributes and may hold `null` or the
//! literal string `"null"` for cleared fields. Responses contain only the
//! resource's schema fields with those values removed.

use serde_json::{Map, Value};

/// Bookkeeping attributes that never appear in responses.
pub const INTERNAL_FIELDS: &[&str] = &[
    "clientId",
    "createdAt",
    "updatedAt",
    "deletedAt",
    "deletedBy",
    "createdBy",
    "updatedBy",
];

fn is_cleared(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s == "null",
        _ => false,
    }
}

/// Remove internal attributes from the top level of a record.
pub fn strip_internal_fields(mut record: Value) -> Value {
    if let Value::Object(map) = &mut record {
        for field in INTERNAL_FIELDS {
            map.remove(*field);
        }
    }
    record
}

fn clean(value: Value) -> Option<Value> {
    match value {
        v if is_cleared(&v) => None,
        Value::Array(items) => {
            let cleaned: Vec<Value> = items.into_iter().filter_map(clean).collect();
            (!cleaned.is_empty()).then_some(Value::Array(cleaned))
        }
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter(|(key, _)| !INTERNAL_FIELDS.contains(&key.as_str()))
                .filter_map(|(key, value)| clean(value).map(|value| (key, value)))
                .collect();
            (!cleaned.is_empty()).then_some(Value::Object(cleaned))
        }
        other => Some(other),
    }
}

/// Recursively drop `null`, `"null"`, empty containers and internal attributes.
///
/// An object that ends up empty is returned as `{}`.
///
/// ```rust
/// use serde_json::json;
/// use tmf_server::resource::schema::remove_null_fields;
///
/// let cleaned = remove_null_fields(json!({
///     "name": "x",
///     "note": [{"text": null, "clientId": "t1"}],
///     "priority": "null",
///     "description": ""
/// }));
/// assert_eq!(cleaned, json!({"name": "x", "description": ""}));
/// ```
pub fn remove_null_fields(value: Value) -> Value {
    match value {
        Value::Object(_) => clean(value).unwrap_or_else(|| Value::Object(Map::new())),
        other => clean(other).unwrap_or(Value::Null),
    }
}

/// Keep only `fields` of a record, cleaning each kept value.
pub fn map_to_schema(record: &Value, fields: &[&str]) -> Value {
    let mapped: Map<String, Value> = fields
        .iter()
        .filter_map(|field| {
            let value = record.get(*field)?.clone();
            clean(value).map(|value| (field.to_string(), value))
        })
        .collect();
    Value::Object(mapped)
}

/// Restrict a response to the requested fields.
///
/// `id`, `href` and `@type` are always kept.
pub fn select_fields(record: &Value, fields: &[String]) -> Value {
    let Value::Object(map) = record else {
        return record.clone();
    };

    let selected: Map<String, Value> = map
        .iter()
        .filter(|(key, value)| {
            matches!(key.as_str(), "id" | "href" | "@type")
                || (fields.iter().any(|field| field == *key) && !is_cleared(value))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_internal_fields_is_shallow() {
        let stripped = strip_internal_fields(json!({
            "id": "n1",
            "clientId": "t1",
            "createdAt": "a",
            "updatedAt": "b",
            "nested": {"clientId": "kept"}
        }));
        assert_eq!(stripped, json!({"id": "n1", "nested": {"clientId": "kept"}}));
    }

    #[test]
    fn test_remove_null_fields_recursive() {
        let cleaned = remove_null_fields(json!({
            "a": {"b": null, "c": {"d": "null"}},
            "list": [null, "null", {"x": null}, 0, false],
            "empty": [],
            "keep": {"e": 1}
        }));
        assert_eq!(cleaned, json!({"list": [0, false], "keep": {"e": 1}}));
        assert_eq!(remove_null_fields(json!({"x": null})), json!({}));
    }

    #[test]
    fn test_map_to_schema() {
        let record = json!({
            "id": "t1",
            "href": "http://x/t1",
            "status": "acknowledged",
            "clientId": "tenant1",
            "priority": null,
            "note": [],
            "notInSchema": "dropped"
        });
        let mapped = map_to_schema(&record, &["id", "href", "status", "priority", "note"]);
        assert_eq!(
            mapped,
            json!({"id": "t1", "href": "http://x/t1", "status": "acknowledged"})
        );
    }

    #[test]
    fn test_select_fields() {
        let record = json!({
            "id": "p1",
            "href": "h",
            "@type": "Product",
            "name": "Fibre",
            "status": "created",
            "description": "null"
        });
        let selected = select_fields(&record, &["name".to_string(), "description".to_string()]);
        assert_eq!(
            selected,
            json!({"id": "p1", "href": "h", "@type": "Product", "name": "Fibre"})
        );
    }
}
