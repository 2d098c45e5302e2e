//! Error types for TMF resource operations.
//!
//! A single taxonomy covers the patch engine, the resource services and the
//! storage collaborator. Every variant maps to an HTTP status through
//! [`TmfError::status_code`], so an outer HTTP layer never needs to inspect
//! message text.

use crate::resource::version::VersionConflict;
use crate::storage::StorageError;

/// Main error type for TMF server operations.
#[derive(Debug, thiserror::Error)]
pub enum TmfError {
    /// A patch path matched none of the supported grammars
    #[error("Invalid path format: '{path}' ({reason})")]
    InvalidPath { path: String, reason: String },

    /// A patch addressed an array that is not a configured relation
    #[error(
        "Invalid array field '{relation}'. Field does not exist in {resource_type} schema. Valid array fields are: {valid}"
    )]
    UnknownRelation {
        resource_type: String,
        relation: String,
        valid: String,
    },

    /// A patch addressed a scalar field outside the patchable allow-list
    #[error("Cannot update non-patchable field '{field}' of {resource_type}")]
    NonPatchableField {
        resource_type: String,
        field: String,
    },

    /// Request body or batch failed validation
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A selector matched no element of the addressed relation
    #[error("No matching element found for filter: {path}")]
    NoMatch { path: String },

    /// The addressed resource does not exist for the tenant
    #[error("{resource_type} with id {id} not found")]
    NotFound { resource_type: String, id: String },

    /// The If-Match tag does not match the stored version
    #[error("Precondition Failed: Resource has been modified by another request ({0})")]
    PreconditionFailed(VersionConflict),

    /// A record with the same identity already exists
    #[error("{resource_type} with these details already exists")]
    DuplicateEntity { resource_type: String },

    /// Errors from the storage collaborator
    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TmfError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown relation error listing the valid relation names
    pub fn unknown_relation<'a>(
        resource_type: impl Into<String>,
        relation: impl Into<String>,
        valid: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self::UnknownRelation {
            resource_type: resource_type.into(),
            relation: relation.into(),
            valid: valid.into_iter().collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a non-patchable field error
    pub fn non_patchable(resource_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self::NonPatchableField {
            resource_type: resource_type.into(),
            field: field.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a no-match error for the given patch path
    pub fn no_match(path: impl Into<String>) -> Self {
        Self::NoMatch { path: path.into() }
    }

    /// Create a resource not found error
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Create a duplicate entity error
    pub fn duplicate(resource_type: impl Into<String>) -> Self {
        Self::DuplicateEntity {
            resource_type: resource_type.into(),
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            TmfError::InvalidPath { .. }
            | TmfError::UnknownRelation { .. }
            | TmfError::NonPatchableField { .. }
            | TmfError::Validation { .. }
            | TmfError::Json(_) => 400,
            TmfError::NoMatch { .. } | TmfError::NotFound { .. } => 404,
            TmfError::DuplicateEntity { .. } => 409,
            TmfError::PreconditionFailed(_) => 412,
            TmfError::Storage(_) => 500,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            TmfError::InvalidPath { .. } => "INVALID_PATH",
            TmfError::UnknownRelation { .. } => "UNKNOWN_RELATION",
            TmfError::NonPatchableField { .. } => "NON_PATCHABLE_FIELD",
            TmfError::Validation { .. } => "VALIDATION_ERROR",
            TmfError::NoMatch { .. } => "NO_MATCH",
            TmfError::NotFound { .. } => "NOT_FOUND",
            TmfError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            TmfError::DuplicateEntity { .. } => "DUPLICATE_ENTITY",
            TmfError::Storage(_) => "STORAGE_ERROR",
            TmfError::Json(_) => "INVALID_JSON",
        }
    }

    /// Whether the error was raised before anything was written.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<StorageError> for TmfError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::ResourceNotFound { collection, id, .. } => TmfError::NotFound {
                resource_type: collection,
                id,
            },
            StorageError::ResourceAlreadyExists { collection, .. } => {
                TmfError::DuplicateEntity {
                    resource_type: collection,
                }
            }
            other => TmfError::Storage(other),
        }
    }
}

impl From<VersionConflict> for TmfError {
    fn from(conflict: VersionConflict) -> Self {
        TmfError::PreconditionFailed(conflict)
    }
}

// Result type alias for convenience
pub type TmfResult<T> = Result<T, TmfError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::version::RawVersion;

    #[test]
    fn test_error_creation() {
        let error = TmfError::not_found("TroubleTicket", "123");
        assert_eq!(error.to_string(), "TroubleTicket with id 123 not found");
        assert_eq!(error.status_code(), 404);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TmfError::invalid_path("$.x[", "unterminated").status_code(), 400);
        assert_eq!(
            TmfError::unknown_relation("TroubleTicket", "foo", ["note"]).status_code(),
            400
        );
        assert_eq!(TmfError::non_patchable("Product", "id").status_code(), 400);
        assert_eq!(TmfError::validation("bad").status_code(), 400);
        assert_eq!(TmfError::no_match("$.note[0]").status_code(), 404);
        assert_eq!(TmfError::duplicate("TroubleTicket").status_code(), 409);
        assert_eq!(
            TmfError::from(VersionConflict::standard_message(
                RawVersion::from_hash("a"),
                RawVersion::from_hash("b"),
            ))
            .status_code(),
            412
        );
        assert_eq!(
            TmfError::from(StorageError::internal("boom")).status_code(),
            500
        );
    }

    #[test]
    fn test_unknown_relation_lists_valid_names() {
        let error = TmfError::unknown_relation("TroubleTicket", "foo", ["note", "attachment"]);
        assert!(error.to_string().contains("Invalid array field 'foo'"));
        assert!(error.to_string().ends_with("note, attachment"));
        assert_eq!(error.error_code(), "UNKNOWN_RELATION");
    }

    #[test]
    fn test_storage_error_mapping() {
        let error = TmfError::from(StorageError::not_found("t1", "note", "n1"));
        assert!(matches!(error, TmfError::NotFound { ref id, .. } if id == "n1"));

        let error = TmfError::from(StorageError::already_exists("t1", "TroubleTicket", "x"));
        assert_eq!(
            error.to_string(),
            "TroubleTicket with these details already exists"
        );

        let error = TmfError::from(StorageError::unavailable("down"));
        assert!(matches!(error, TmfError::Storage(_)));
        assert!(!error.is_client_error());
    }
}
