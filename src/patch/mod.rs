//! The JSON Patch Query engine.
//!
//! A patch request is either a list of operations addressing fields and
//! relation elements by path ([`PatchRequest::Query`]) or a partial entity
//! merged into the stored one ([`PatchRequest::Merge`]).
//!
//! The engine is generic over resources: everything resource specific comes
//! from a [`ResourceDefinition`](crate::resource::definition::ResourceDefinition).
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tmf_server::patch::PatchRequest;
//!
//! let request = PatchRequest::from_body(json!([
//!     {"op": "replace", "path": "$.note[?(@.author=='Bob')].text", "value": "Updated"}
//! ]))
//! .unwrap();
//! assert!(matches!(request, PatchRequest::Query(ref ops) if ops.len() == 1));
//!
//! let request = PatchRequest::from_body(json!({"status": "resolved"})).unwrap();
//! assert!(matches!(request, PatchRequest::Merge(_)));
//! ```

pub mod applier;
pub mod executor;
pub mod matcher;
pub mod merge;
pub mod merge_patch;
pub mod operation;
pub mod path;

pub use applier::{AppliedChange, PatchContext};
pub use executor::{ChangeSet, PatchOutcome, execute};
pub use operation::{PatchOp, PatchOperation, ValidatedOperation, validate_batch, validate_batch_for};
pub use path::{Condition, Locator, Selector, parse_path};

use serde_json::{Map, Value};

use crate::error::{TmfError, TmfResult};

/// The two patch modes, decided once from the request body.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchRequest {
    /// JSON Patch Query operations, applied in order
    Query(Vec<PatchOperation>),
    /// Partial entity for merge-patch
    Merge(Map<String, Value>),
}

impl PatchRequest {
    /// Classify a request body.
    ///
    /// An array, or an object with an `op` key, is a query; any other object
    /// is a merge.
    pub fn from_body(body: Value) -> TmfResult<Self> {
        match body {
            Value::Array(items) => items
                .iter()
                .map(PatchOperation::from_value)
                .collect::<TmfResult<Vec<_>>>()
                .map(PatchRequest::Query),
            Value::Object(map) if map.contains_key("op") => {
                let operation = PatchOperation::from_value(&Value::Object(map))?;
                Ok(PatchRequest::Query(vec![operation]))
            }
            Value::Object(map) => Ok(PatchRequest::Merge(map)),
            other => Err(TmfError::validation(format!(
                "Patch body must be an object or an array of operations, got {}",
                other
            ))),
        }
    }
}
