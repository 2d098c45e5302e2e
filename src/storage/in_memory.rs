//! In-memory storage implementation for TMF resources.
//!
//! This module provides a thread-safe in-memory implementation of the `StorageProvider`
//! trait using HashMap and RwLock for concurrent access. It's designed for testing,
//! development, and scenarios where persistence is not required.
//!
//! # Features
//!
//! * Thread-safe concurrent access with async RwLock
//! * Automatic tenant isolation through hierarchical key structure
//! * Equality filters compared with string coercion, like the patch engine's filters
//! * Consistent ordering for list operations
//!
//! # Performance Characteristics
//!
//! * CREATE/GET/UPDATE/DELETE: O(1) average case
//! * LIST with filters and pagination: O(n log n) where n is records in the collection
//! * FIND_BY_ATTRIBUTE / COUNT: O(n)
//!
//! # Example Usage
//!
//! ```rust
//! use tmf_server::storage::{InMemoryStorage, StorageProvider, StorageKey};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = InMemoryStorage::new();
//!
//! let key = StorageKey::new("tenant1", "related_party", "rp1");
//! let stored = storage.create(key.clone(), json!({"name": "Jane", "role": "customer"})).await?;
//! assert_eq!(stored["id"], "rp1");
//! assert_eq!(stored["clientId"], "tenant1");
//!
//! let prefix = StorageKey::prefix("tenant1", "related_party");
//! let found = storage.find_by_attribute(prefix, "role", "customer").await?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::patch::matcher::{get_nested, js_string};
use crate::storage::{ListQuery, StorageError, StorageKey, StoragePrefix, StorageProvider};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Collection = HashMap<String, Value>;

/// Thread-safe in-memory storage implementation.
///
/// Uses a nested HashMap structure:
/// `tenant_id` → `collection` → `record_id` → `data`
#[derive(Clone)]
pub struct InMemoryStorage {
    // Structure: tenant_id -> collection -> record_id -> data
    data: Arc<RwLock<HashMap<String, HashMap<String, Collection>>>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage instance.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get storage statistics for debugging and monitoring.
    pub async fn stats(&self) -> InMemoryStorageStats {
        let data_guard = self.data.read().await;
        let mut tenant_count = 0;
        let mut collection_count = 0;
        let mut total_records = 0;

        for tenant_data in data_guard.values() {
            tenant_count += 1;
            for records in tenant_data.values() {
                collection_count += 1;
                total_records += records.len();
            }
        }

        InMemoryStorageStats {
            tenant_count,
            collection_count,
            total_records,
        }
    }

    /// Get all tenant IDs currently in storage.
    pub async fn list_tenants(&self) -> Vec<String> {
        let data_guard = self.data.read().await;
        data_guard.keys().cloned().collect()
    }

    /// Get all collections holding records for a specific tenant.
    pub async fn list_collections(&self, tenant_id: &str) -> Vec<String> {
        let data_guard = self.data.read().await;
        data_guard
            .get(tenant_id)
            .map(|tenant_data| tenant_data.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn timestamp() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Extract a nested attribute value using dot notation, coerced to a string.
    ///
    /// Numeric segments index into arrays.
    fn extract_attribute_value(data: &Value, attribute_path: &str) -> Option<String> {
        let mut current = data;

        for part in attribute_path.split('.') {
            current = match part.parse::<usize>() {
                Ok(index) if current.is_array() => current.get(index)?,
                _ => current.get(part)?,
            };
        }

        Some(js_string(Some(current)))
    }

    fn matches(record: &Value, query: &ListQuery) -> bool {
        let filtered = query.filters.iter().all(|(attribute, expected)| {
            js_string(get_nested(record, attribute)) == js_string(Some(expected))
        });

        filtered
            && query.search.as_ref().is_none_or(|search| {
                let term = search.term.to_lowercase();
                search.attributes.iter().any(|attribute| {
                    get_nested(record, attribute)
                        .is_some_and(|value| js_string(Some(value)).to_lowercase().contains(&term))
                })
            })
    }

    fn compare_by(a: &Value, b: &Value, attribute: &str) -> Ordering {
        match (get_nested(a, attribute), get_nested(b, attribute)) {
            (Some(Value::Number(x)), Some(Value::Number(y))) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Some(x), Some(y)) => js_string(Some(x)).cmp(&js_string(Some(y))),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// Records of a collection matching the filters, ordered by the query's sort.
    fn select<'a>(records: &'a Collection, query: &ListQuery) -> Vec<(&'a String, &'a Value)> {
        let mut selected: Vec<_> = records
            .iter()
            .filter(|(_, record)| Self::matches(record, query))
            .collect();

        selected.sort_by(|a, b| a.0.cmp(b.0));
        if let Some(sort) = query.sort.as_deref() {
            let (attribute, descending) = match sort.strip_prefix('-') {
                Some(attribute) => (attribute, true),
                None => (sort, false),
            };
            selected.sort_by(|a, b| {
                let ordering = Self::compare_by(a.1, b.1, attribute);
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        selected
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageProvider for InMemoryStorage {
    type Error = StorageError;

    async fn get(&self, key: StorageKey) -> Result<Option<Value>, Self::Error> {
        let data_guard = self.data.read().await;

        let result = data_guard
            .get(key.tenant_id())
            .and_then(|tenant_data| tenant_data.get(key.collection()))
            .and_then(|records| records.get(key.id()))
            .cloned();

        Ok(result)
    }

    async fn create(&self, key: StorageKey, data: Value) -> Result<Value, Self::Error> {
        let Value::Object(mut record) = data else {
            return Err(StorageError::invalid_data_with_cause(
                format!("record {} must be a JSON object", key),
                "non-object value",
            ));
        };

        let mut data_guard = self.data.write().await;
        let records = data_guard
            .entry(key.tenant_id().to_string())
            .or_default()
            .entry(key.collection().to_string())
            .or_default();

        if records.contains_key(key.id()) {
            return Err(StorageError::already_exists(
                key.tenant_id(),
                key.collection(),
                key.id(),
            ));
        }

        let now = Self::timestamp();
        record.insert("id".to_string(), Value::String(key.id().to_string()));
        record.insert(
            "clientId".to_string(),
            Value::String(key.tenant_id().to_string()),
        );
        record.insert("createdAt".to_string(), Value::String(now.clone()));
        record.insert("updatedAt".to_string(), Value::String(now));

        let stored = Value::Object(record);
        records.insert(key.id().to_string(), stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        key: StorageKey,
        changes: Map<String, Value>,
    ) -> Result<Value, Self::Error> {
        let mut data_guard = self.data.write().await;

        let record = data_guard
            .get_mut(key.tenant_id())
            .and_then(|tenant_data| tenant_data.get_mut(key.collection()))
            .and_then(|records| records.get_mut(key.id()))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| StorageError::not_found(key.tenant_id(), key.collection(), key.id()))?;

        for (attribute, value) in changes {
            // Record identity is owned by the key.
            if matches!(attribute.as_str(), "id" | "clientId" | "createdAt") {
                continue;
            }
            record.insert(attribute, value);
        }
        record.insert("updatedAt".to_string(), Value::String(Self::timestamp()));

        Ok(Value::Object(record.clone()))
    }

    async fn delete(&self, key: StorageKey) -> Result<bool, Self::Error> {
        let mut data_guard = self.data.write().await;

        let existed = data_guard
            .get_mut(key.tenant_id())
            .and_then(|tenant_data| tenant_data.get_mut(key.collection()))
            .is_some_and(|records| records.remove(key.id()).is_some());

        Ok(existed)
    }

    async fn list(
        &self,
        prefix: StoragePrefix,
        query: &ListQuery,
    ) -> Result<Vec<Value>, Self::Error> {
        if query.limit == Some(0) {
            return Ok(Vec::new());
        }

        let data_guard = self.data.read().await;

        let records = match data_guard
            .get(prefix.tenant_id())
            .and_then(|tenant_data| tenant_data.get(prefix.collection()))
        {
            Some(records) => records,
            None => return Ok(Vec::new()),
        };

        let results = Self::select(records, query)
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|(_, record)| record.clone())
            .collect();

        Ok(results)
    }

    async fn count(&self, prefix: StoragePrefix, query: &ListQuery) -> Result<usize, Self::Error> {
        let data_guard = self.data.read().await;

        let count = data_guard
            .get(prefix.tenant_id())
            .and_then(|tenant_data| tenant_data.get(prefix.collection()))
            .map(|records| {
                records
                    .values()
                    .filter(|record| Self::matches(record, query))
                    .count()
            })
            .unwrap_or(0);

        Ok(count)
    }

    async fn find_by_attribute(
        &self,
        prefix: StoragePrefix,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<Value>, Self::Error> {
        let data_guard = self.data.read().await;

        let records = match data_guard
            .get(prefix.tenant_id())
            .and_then(|tenant_data| tenant_data.get(prefix.collection()))
        {
            Some(records) => records,
            None => return Ok(Vec::new()),
        };

        let mut results: Vec<(&String, &Value)> = records
            .iter()
            .filter(|(_, record)| {
                Self::extract_attribute_value(record, attribute).as_deref() == Some(value)
            })
            .collect();

        // Sort results by record ID for consistency
        results.sort_by(|a, b| a.0.cmp(b.0));

        Ok(results
            .into_iter()
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        let mut data_guard = self.data.write().await;
        data_guard.clear();
        Ok(())
    }
}

/// Statistics about the current state of in-memory storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryStorageStats {
    /// Number of tenants with data
    pub tenant_count: usize,
    /// Number of collections across all tenants
    pub collection_count: usize,
    /// Total number of individual records
    pub total_records: usize,
}
