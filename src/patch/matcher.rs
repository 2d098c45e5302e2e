//! Element matching for relation arrays.
//!
//! Filter conditions compare the *string form* of an element's value with the
//! filter's value, so a stored number `3` matches the filter value `"3"`. The
//! string form follows JavaScript's `String()` conversion, which is what
//! existing clients of the TMF services rely on.

use serde_json::Value;

use crate::patch::path::{Condition, Selector};

/// String form of a JSON value, as JavaScript's `String()` would render it.
///
/// `None` stands for a missing value and renders as `"undefined"`.
///
/// ```rust
/// use serde_json::json;
/// use tmf_server::patch::matcher::js_string;
///
/// assert_eq!(js_string(Some(&json!(3.0))), "3");
/// assert_eq!(js_string(Some(&json!(null))), "null");
/// assert_eq!(js_string(Some(&json!([1, "a", null]))), "1,a,");
/// assert_eq!(js_string(Some(&json!({"a": 1}))), "[object Object]");
/// assert_eq!(js_string(None), "undefined");
/// ```
pub fn js_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => js_number(n),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_string(),
    }
}

fn js_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => "0".to_string(),
        Some(f) if f.abs() >= 1e21 || f.abs() < 1e-6 => js_exponential(f),
        Some(f) if f.fract() == 0.0 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// `1e+21`, `1.5e-7`: shortest digits with a signed exponent.
fn js_exponential(f: f64) -> String {
    let formatted = format!("{:e}", f);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{}e+{}", mantissa, exponent)
        }
        _ => formatted,
    }
}

/// Walk a dotted path through objects (and array indices).
///
/// Returns `None` as soon as a segment is missing or the current value is not
/// a container. An empty path yields `None`.
pub fn get_nested<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    path.split('.').try_fold(value, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Whether every condition holds for the element.
pub fn matches_all(element: &Value, conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .all(|condition| js_string(get_nested(element, &condition.field)) == condition.value)
}

/// Indices of the elements selected, in array order.
///
/// ```rust
/// use serde_json::json;
/// use tmf_server::patch::matcher::match_elements;
/// use tmf_server::patch::path::{Condition, Selector};
///
/// let notes = vec![json!({"id": "a"}), json!({"id": "b"})];
/// assert_eq!(match_elements(&notes, Selector::Index(1)), vec![1]);
/// assert!(match_elements(&notes, Selector::Index(2)).is_empty());
///
/// let by_id = [Condition::new("id", "b")];
/// assert_eq!(match_elements(&notes, Selector::Conditions(&by_id)), vec![1]);
/// ```
pub fn match_elements(elements: &[Value], selector: Selector<'_>) -> Vec<usize> {
    match selector {
        Selector::Index(index) if index < elements.len() => vec![index],
        Selector::Index(_) => Vec::new(),
        Selector::Conditions(conditions) => elements
            .iter()
            .enumerate()
            .filter(|(_, element)| matches_all(element, conditions))
            .map(|(i, _)| i)
            .collect(),
    }
}
