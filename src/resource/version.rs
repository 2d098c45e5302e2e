//! Version control types for TMF resources.
//!
//! This module provides the types behind `If-Match` optimistic locking. A
//! resource's version is the storage-maintained `updatedAt` timestamp, falling
//! back to `createdAt` for records that were never updated.
//!
//! # Type-Safe Format Management
//!
//! Phantom types distinguish the HTTP header format from the raw internal format
//! at compile time:
//!
//! * [`HttpVersion`] - HTTP ETag format (`"2024-01-01T00:00:00.000000Z"`)
//! * [`RawVersion`] - Internal raw format (`2024-01-01T00:00:00.000000Z`)
//! * [`VersionConflict`] - Error details for version mismatches
//!
//! # Basic Usage
//!
//! ```rust
//! use tmf_server::resource::version::{RawVersion, HttpVersion};
//! use serde_json::json;
//!
//! let record = json!({"id": "t1", "createdAt": "a", "updatedAt": "b"});
//! let current = RawVersion::from_record(&record).unwrap();
//! assert_eq!(current.as_str(), "b");
//!
//! // Clients may send weak, strong, or bare tags
//! let tag: HttpVersion = "W/\"b\"".parse().unwrap();
//! assert_eq!(current, tag);
//! assert_eq!(HttpVersion::from(current).to_string(), "\"b\"");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::{fmt, marker::PhantomData, str::FromStr};
use thiserror::Error;

// Phantom type markers for format distinction
#[derive(Debug, Clone, Copy)]
pub struct Http;

#[derive(Debug, Clone, Copy)]
pub struct Raw;

/// Opaque version identifier with compile-time format safety.
///
/// The internal representation remains opaque; versions are only compared for
/// equality.
#[derive(Debug, Clone, Eq, Hash)]
pub struct EntityVersion<Format> {
    /// Opaque version identifier
    opaque: String,
    #[allow(dead_code)]
    _format: PhantomData<Format>,
}

/// Type alias for HTTP ETag format versions
pub type HttpVersion = EntityVersion<Http>;

/// Type alias for raw internal format versions
pub type RawVersion = EntityVersion<Raw>;

impl<Format> EntityVersion<Format> {
    /// Create a version from a provider-specific identifier.
    pub fn from_hash(hash_string: impl AsRef<str>) -> RawVersion {
        EntityVersion {
            opaque: hash_string.as_ref().to_string(),
            _format: PhantomData,
        }
    }

    /// Read the version token of a stored record.
    ///
    /// Uses `updatedAt`, else `createdAt`. Returns `None` when the record
    /// carries neither.
    pub fn from_record(record: &Value) -> Option<RawVersion> {
        record
            .get("updatedAt")
            .and_then(Value::as_str)
            .or_else(|| record.get("createdAt").and_then(Value::as_str))
            .filter(|token| !token.is_empty())
            .map(EntityVersion::<Raw>::from_hash)
    }

    /// Get the opaque version string.
    pub fn as_str(&self) -> &str {
        &self.opaque
    }
}

impl fmt::Display for EntityVersion<Raw> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opaque)
    }
}

// Timestamps are exact, so the ETag is strong.
impl fmt::Display for EntityVersion<Http> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.opaque)
    }
}

impl FromStr for EntityVersion<Raw> {
    type Err = VersionError;

    fn from_str(version_str: &str) -> Result<Self, Self::Err> {
        let trimmed = version_str.trim();

        if trimmed.is_empty() {
            return Err(VersionError::ParseError(
                "Version string cannot be empty".to_string(),
            ));
        }

        Ok(EntityVersion {
            opaque: trimmed.to_string(),
            _format: PhantomData,
        })
    }
}

/// Parses an `If-Match` header value.
///
/// Accepts weak (`W/"x"`), strong (`"x"`), single-quoted (`'x'`) and bare (`x`)
/// tags; quotes are stripped.
impl FromStr for EntityVersion<Http> {
    type Err = VersionError;

    fn from_str(etag_header: &str) -> Result<Self, Self::Err> {
        let trimmed = etag_header.trim();
        let etag_value = trimmed.strip_prefix("W/").unwrap_or(trimmed);

        let opaque = etag_value
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string();

        if opaque.is_empty() {
            return Err(VersionError::InvalidEtagFormat(etag_header.to_string()));
        }

        Ok(EntityVersion {
            opaque,
            _format: PhantomData,
        })
    }
}

impl From<EntityVersion<Raw>> for EntityVersion<Http> {
    fn from(raw: EntityVersion<Raw>) -> Self {
        EntityVersion {
            opaque: raw.opaque,
            _format: PhantomData,
        }
    }
}

impl From<EntityVersion<Http>> for EntityVersion<Raw> {
    fn from(http: EntityVersion<Http>) -> Self {
        EntityVersion {
            opaque: http.opaque,
            _format: PhantomData,
        }
    }
}

// Cross-format comparison (versions are equal if opaque strings match)
impl<F1, F2> PartialEq<EntityVersion<F2>> for EntityVersion<F1> {
    fn eq(&self, other: &EntityVersion<F2>) -> bool {
        self.opaque == other.opaque
    }
}

impl<Format> Serialize for EntityVersion<Format> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.opaque.serialize(serializer)
    }
}

impl<'de, Format> Deserialize<'de> for EntityVersion<Format> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opaque = String::deserialize(deserializer)?;
        Ok(EntityVersion {
            opaque,
            _format: PhantomData,
        })
    }
}

/// Check an optional `If-Match` tag against a stored record.
///
/// Passes when no tag was sent or the record has no version token.
pub fn check_if_match(if_match: Option<&HttpVersion>, record: &Value) -> Result<(), VersionConflict> {
    let (Some(expected), Some(current)) = (if_match, RawVersion::from_record(record)) else {
        return Ok(());
    };

    if *expected == current {
        Ok(())
    } else {
        Err(VersionConflict::standard_message(expected.clone(), current))
    }
}

/// Details about a version conflict during a conditional operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConflict {
    /// The version that was expected by the client (raw format)
    pub expected: RawVersion,

    /// The current version of the resource on the server (raw format)
    pub current: RawVersion,

    /// Human-readable error message describing the conflict
    pub message: String,
}

impl VersionConflict {
    /// Create a new version conflict.
    pub fn new<E, C>(expected: E, current: C, message: impl Into<String>) -> Self
    where
        E: Into<RawVersion>,
        C: Into<RawVersion>,
    {
        Self {
            expected: expected.into(),
            current: current.into(),
            message: message.into(),
        }
    }

    /// Create a standard version conflict message.
    pub fn standard_message<E, C>(expected: E, current: C) -> Self
    where
        E: Into<RawVersion>,
        C: Into<RawVersion>,
    {
        Self::new(
            expected,
            current,
            "Resource was modified by another client. Please refresh and try again.",
        )
    }
}

impl fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Version conflict: expected '{}', found '{}'. {}",
            self.expected, self.current, self.message
        )
    }
}

impl std::error::Error for VersionConflict {}

/// Errors that can occur during version operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VersionError {
    /// Invalid ETag format provided
    #[error("Invalid ETag format: {0}")]
    InvalidEtagFormat(String),

    /// Version parsing failed
    #[error("Failed to parse version: {0}")]
    ParseError(String),
}
