//! Dotted-path updates inside JSON objects.
//!
//! Attribute paths such as `role.name` address nested objects. Writes create
//! the intermediate objects they need; deletes of a missing path are no-ops.
//! A nested update never touches siblings of the written leaf.

use serde_json::{Map, Value};

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was replaced by an object above"),
    }
}

/// Write `value` at a dotted path.
///
/// Missing intermediates are created, and an intermediate that is not an
/// object is replaced by one.
///
/// ```rust
/// use serde_json::json;
/// use tmf_server::patch::merge::set_path;
///
/// let mut target = json!({"a": {"keep": 1, "b": 5}});
/// set_path(&mut target, "a.b.c", json!("x"));
/// assert_eq!(target, json!({"a": {"keep": 1, "b": {"c": "x"}}}));
/// ```
pub fn set_path(target: &mut Value, path: &str, value: Value) {
    let map = ensure_object(target);
    match path.split_once('.') {
        Some((head, rest)) => set_path(map.entry(head).or_insert(Value::Null), rest, value),
        None => {
            map.insert(path.to_string(), value);
        }
    }
}

/// Remove the leaf at a dotted path. Does nothing if any part is missing.
pub fn delete_path(target: &mut Value, path: &str) {
    match path.split_once('.') {
        Some((head, rest)) => {
            if let Some(next) = target.get_mut(head) {
                delete_path(next, rest);
            }
        }
        None => {
            if let Value::Object(map) = target {
                map.remove(path);
            }
        }
    }
}

/// Build the partial update that writes `value` at `attribute` of `element`.
///
/// For a dotted attribute the top-level object is copied, the remainder is
/// set on the copy and `{top: copy}` is returned, so sibling keys survive a
/// shallow merge of the result. A `null` value deletes the leaf instead.
/// A plain attribute yields `{attribute: value}`.
///
/// ```rust
/// use serde_json::json;
/// use tmf_server::patch::merge::nested_update;
///
/// let party = json!({"role": {"name": "reporter", "since": "2024"}});
/// let update = nested_update(&party, "role.name", &json!("customer"));
/// assert_eq!(json!(update), json!({"role": {"name": "customer", "since": "2024"}}));
///
/// let update = nested_update(&party, "role.since", &json!(null));
/// assert_eq!(json!(update), json!({"role": {"name": "reporter"}}));
/// ```
pub fn nested_update(element: &Value, attribute: &str, value: &Value) -> Map<String, Value> {
    let mut update = Map::new();

    match attribute.split_once('.') {
        None => {
            update.insert(attribute.to_string(), value.clone());
        }
        Some((top, rest)) => {
            let mut merged = element
                .get(top)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            if value.is_null() {
                delete_path(&mut merged, rest);
            } else {
                set_path(&mut merged, rest, value.clone());
            }
            update.insert(top.to_string(), merged);
        }
    }

    update
}

/// Shallow-merge `changes` into an object, the way storage applies updates.
pub fn merge_shallow(target: &mut Value, changes: &Map<String, Value>) {
    let map = ensure_object(target);
    for (key, value) in changes {
        map.insert(key.clone(), value.clone());
    }
}
