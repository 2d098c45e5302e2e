//! Storage abstraction layer for TMF resources and their related records.
//!
//! The `StorageProvider` trait defines protocol-agnostic data operations on JSON
//! records addressed by tenant, collection and record id. Resource semantics
//! (relations, status history, patch handling, events) live in the resource and
//! patch layers; storage only keeps documents.
//!
//! # Architecture
//!
//! The storage layer is responsible for:
//! - Create/read/update/delete of JSON records
//! - Tenant isolation through [`StorageKey`]
//! - Simple equality filtering and pagination
//! - Record bookkeeping fields (`createdAt`, `updatedAt`, `clientId`)
//!
//! The storage layer is NOT responsible for:
//! - TMF timestamps such as `creationDate` or `lastUpdate`
//! - Relation population or cascading deletes
//! - Patch path resolution
//!
//! # Example Usage
//!
//! ```rust
//! use tmf_server::storage::{InMemoryStorage, StorageKey, StorageProvider};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = InMemoryStorage::new();
//!
//! let key = StorageKey::new("tenant1", "note", "n1");
//! storage.create(key.clone(), json!({"text": "first"})).await?;
//!
//! let mut changes = serde_json::Map::new();
//! changes.insert("text".to_string(), json!("edited"));
//! let updated = storage.update(key.clone(), changes).await?;
//! assert_eq!(updated["text"], "edited");
//!
//! assert!(storage.delete(key).await?);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod in_memory;

pub use errors::StorageError;
pub use in_memory::{InMemoryStorage, InMemoryStorageStats};

use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;

/// A hierarchical key for identifying records in storage.
///
/// Records are organized as `tenant_id` → `collection` → `id`. Child records of a
/// relation live in their own collection (e.g. `note`, `status_change_history`)
/// under the same tenant as their parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    tenant_id: String,
    collection: String,
    id: String,
}

impl StorageKey {
    /// Create a new storage key.
    pub fn new(
        tenant_id: impl Into<String>,
        collection: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Get the tenant ID.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Get the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Get the record ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Create a prefix for listing records of a collection within a tenant.
    pub fn prefix(tenant_id: impl Into<String>, collection: impl Into<String>) -> StoragePrefix {
        StoragePrefix {
            tenant_id: tenant_id.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.collection, self.id)
    }
}

/// A prefix for querying records by tenant and collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePrefix {
    tenant_id: String,
    collection: String,
}

impl StoragePrefix {
    /// Get the tenant ID.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Get the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Build a full key for a record under this prefix.
    pub fn key(&self, id: impl Into<String>) -> StorageKey {
        StorageKey::new(&self.tenant_id, &self.collection, id)
    }
}

impl fmt::Display for StoragePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.collection)
    }
}

/// Filtering, ordering and pagination for [`StorageProvider::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    /// Top-level attribute equality filters. Values are compared as strings.
    pub filters: Map<String, Value>,
    /// Number of matching records to skip.
    pub offset: usize,
    /// Maximum number of records to return; `None` means no limit.
    pub limit: Option<usize>,
    /// Sort attribute; a leading `-` sorts descending. Defaults to record id.
    pub sort: Option<String>,
    /// Case-insensitive substring search over several attributes.
    pub search: Option<TextSearch>,
}

/// A record matches when any of `attributes` contains `term`, ignoring case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSearch {
    pub term: String,
    pub attributes: Vec<String>,
}

impl TextSearch {
    pub fn new(term: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            term: term.into(),
            attributes,
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(attribute.into(), value.into());
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn with_search(mut self, search: TextSearch) -> Self {
        self.search = Some(search);
        self
    }
}

/// Core trait for storage providers that handle pure record persistence.
///
/// All operations are scoped to a tenant through [`StorageKey`] / [`StoragePrefix`].
/// Implementations maintain the bookkeeping attributes `id`, `clientId`,
/// `createdAt` and `updatedAt` on every record; `updatedAt` (falling back to
/// `createdAt`) is the version token used for optimistic locking.
pub trait StorageProvider: Send + Sync {
    /// The error type returned by storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Retrieve a record by key.
    ///
    /// Returns `Some(record)` if it exists, `None` otherwise.
    fn get(&self, key: StorageKey)
    -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send;

    /// Create a new record at the given key and return it as stored.
    ///
    /// # Behavior
    /// - Fails if a record already exists at the key
    /// - `data` must be a JSON object
    fn create(
        &self,
        key: StorageKey,
        data: Value,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Shallow-merge `changes` into an existing record and return the result.
    ///
    /// # Behavior
    /// - Attributes absent from `changes` are preserved
    /// - Attributes present with a `null` value are stored as `null`
    /// - Fails if the record does not exist
    fn update(
        &self,
        key: StorageKey,
        changes: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Delete a record by key.
    ///
    /// Returns `true` if the record was deleted, `false` if it didn't exist.
    fn delete(&self, key: StorageKey) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// List records of a collection matching the query.
    fn list(
        &self,
        prefix: StoragePrefix,
        query: &ListQuery,
    ) -> impl Future<Output = Result<Vec<Value>, Self::Error>> + Send;

    /// Count records of a collection matching the query filters and search.
    ///
    /// Pagination fields of `query` are ignored.
    fn count(
        &self,
        prefix: StoragePrefix,
        query: &ListQuery,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Find records by a (possibly dotted) attribute value.
    ///
    /// Performs string matching on the attribute; nested attributes use dot notation.
    fn find_by_attribute(
        &self,
        prefix: StoragePrefix,
        attribute: &str,
        value: &str,
    ) -> impl Future<Output = Result<Vec<Value>, Self::Error>> + Send;

    /// Remove all records from all tenants. Intended for tests.
    fn clear(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
