//! Paged list responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pagination metadata of a list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl PageMeta {
    pub fn new(total: usize, offset: usize, limit: usize) -> Self {
        Self {
            total,
            offset,
            limit,
            has_more: offset.saturating_add(limit) < total,
        }
    }
}

/// One page of a list response: `{data, meta}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<Value>,
    pub meta: PageMeta,
}

impl Page {
    pub fn new(data: Vec<Value>, total: usize, offset: usize, limit: usize) -> Self {
        Self {
            data,
            meta: PageMeta::new(total, offset, limit),
        }
    }
}
