//! TMF resource model and services.
//!
//! Resources are schemaless JSON documents described by a
//! [`ResourceDefinition`]. The definition drives a generic
//! [`ResourceService`] that stores the parent row, keeps relation children in
//! their own collections and shapes responses.
//!
//! # Key Components
//!
//! * [`ResourceDefinition`] - per-resource configuration (relations, patchable
//!   fields, state tracking, event names)
//! * [`ResourceService`] - create, get, list, patch and remove
//! * [`RequestContext`] - tenant, request id and `If-Match` tag of a request
//! * [`version`] - ETags and optimistic locking
//! * [`schema`] - schema projection and response cleanup

pub mod context;
pub mod definition;
pub mod page;
pub mod relation;
pub mod schema;
pub mod service;
pub mod version;

pub use context::RequestContext;
pub use definition::{NestedFieldRule, ResourceDefinition, StateTracking};
pub use page::{Page, PageMeta};
pub use relation::{ChildFactory, Relation, RelationMap};
pub use service::{ListRequest, ResourceService, VersionedEntity};
pub use version::{HttpVersion, RawVersion, VersionConflict, VersionError};

use chrono::{SecondsFormat, Utc};

/// Current time as an ISO-8601 UTC timestamp with milliseconds.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
