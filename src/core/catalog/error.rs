//! Error types for the card catalog.
//!
//! `CatalogError` covers storage, import, validation and blob failures. The
//! import and removal pipelines never surface these to their callers directly;
//! they fold them into result structs (see [`super::import::ImportResult`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Error enum for every fallible catalog operation.
#[derive(Error, Debug)]
pub enum CatalogError {
    // =========================================================================
    // Import Errors
    // =========================================================================

    /// Payload is not an object or carries no recognizable card arrays.
    #[error("Invalid import format: {0}")]
    Format(String),

    /// One or more fields failed validation.
    #[error("Validation failed with {} error(s)", errors.len())]
    FieldValidation {
        /// Every offending field, path-qualified
        errors: Vec<FieldError>,
    },

    /// Card ids already present in the catalog (or repeated in the payload).
    #[error("Duplicate card ids: {ids:?}")]
    IdConflict {
        /// All colliding ids
        ids: Vec<String>,
    },

    /// Variant type ids the candidate batch would redefine.
    #[error("Variant types already defined by installed batches: {type_ids:?}")]
    VariantTypeConflict {
        /// All conflicting variant type ids
        type_ids: Vec<String>,
    },

    /// A raw card could not be mapped to a standard card.
    #[error("Card conversion failed at {path}: {reason}")]
    Conversion {
        /// Payload path of the card (e.g. `profession[2]`)
        path: String,
        /// Description of the failure
        reason: String,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================

    /// Writing would exceed the configured storage quota.
    #[error("Storage quota exceeded: {current} bytes used, {required} bytes required, quota {quota} bytes")]
    StorageQuota {
        /// Bytes currently in use
        current: u64,
        /// Bytes the pending write needs
        required: u64,
        /// Configured quota
        quota: u64,
    },

    /// The key/value medium rejected a write.
    #[error("Storage write failed for '{key}': {reason}")]
    StorageWrite {
        /// Key being written or removed
        key: String,
        /// Backend-supplied reason
        reason: String,
    },

    /// The key/value medium failed to read a record.
    #[error("Storage read failed for '{key}': {reason}")]
    StorageRead {
        /// Key being read
        key: String,
        /// Backend-supplied reason
        reason: String,
    },

    /// A stored record exists but cannot be parsed.
    #[error("Corrupted record '{key}': {reason}")]
    Corrupted {
        /// Key of the unreadable record
        key: String,
        /// Parse failure description
        reason: String,
    },

    /// Persisted schema stamp is newer than this build understands.
    #[error("Unsupported storage schema version {found} (supported: {supported})")]
    SchemaVersion {
        /// Version found on disk
        found: u32,
        /// Highest version this build supports
        supported: u32,
    },

    // =========================================================================
    // Batch Errors
    // =========================================================================

    /// The built-in batch cannot be removed.
    #[error("The system batch cannot be removed")]
    SystemBatchProtected,

    /// No batch with the given id.
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// No loaded card with the given id.
    #[error("Card not found: {0}")]
    CardNotFound(String),

    /// Images attach only to cards of imported batches.
    #[error("Card '{0}' belongs to the system batch and cannot carry a stored image")]
    SystemCardImage(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================

    /// Blob store operation failed.
    #[error("Blob store error: {0}")]
    Blob(String),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// Create a storage write error.
    pub fn storage_write(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageWrite {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage read error.
    pub fn storage_read(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageRead {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupted-record error.
    pub fn corrupted(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a blob store error.
    pub fn blob(msg: impl Into<String>) -> Self {
        Self::Blob(msg.into())
    }

    /// Whether the error came from the persistence medium rather than the payload.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::StorageQuota { .. }
                | Self::StorageWrite { .. }
                | Self::StorageRead { .. }
                | Self::Corrupted { .. }
                | Self::Io(_)
        )
    }

    /// Flatten into the user-facing message list rendered by callers.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::FieldValidation { errors } => errors.iter().map(FieldError::to_string).collect(),
            other => vec![other.to_string()],
        }
    }
}

// ============================================================================
// FieldError - path-qualified validation diagnostic
// ============================================================================

/// A single validation failure, addressed by payload path.
///
/// Paths use the payload's own keys, e.g. `variant[0].类型` or
/// `customFieldDefinitions.variantTypes.食物.levelRange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: &serde_json::Value) -> Self {
        self.value = Some(value.clone());
        self
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_quota() {
        let err = CatalogError::StorageQuota {
            current: 4_000_000,
            required: 2_000_000,
            quota: 5_242_880,
        };
        let msg = err.to_string();
        assert!(msg.contains("4000000"));
        assert!(msg.contains("2000000"));
        assert!(msg.contains("5242880"));
    }

    #[test]
    fn test_error_display_id_conflict_lists_all_ids() {
        let err = CatalogError::IdConflict {
            ids: vec!["card-a".to_string(), "card-b".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("card-a"));
        assert!(msg.contains("card-b"));
    }

    #[test]
    fn test_field_validation_messages_are_path_qualified() {
        let err = CatalogError::FieldValidation {
            errors: vec![
                FieldError::new("variant[0].类型", "unknown variant type"),
                FieldError::new("profession[1].id", "must be a non-empty string"),
            ],
        };
        let messages = err.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], "variant[0].类型: unknown variant type");
    }

    #[test]
    fn test_is_storage() {
        assert!(CatalogError::storage_write("k", "disk full").is_storage());
        assert!(CatalogError::corrupted("k", "bad json").is_storage());
        assert!(!CatalogError::SystemBatchProtected.is_storage());
        assert!(!CatalogError::Format("x".into()).is_storage());
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CatalogError = json_err.into();
        assert!(matches!(err, CatalogError::Serialization(_)));
    }

    #[test]
    fn test_field_error_with_value() {
        let err = FieldError::new("ancestry[0].等级", "expected a number")
            .with_value(&serde_json::json!("high"));
        assert_eq!(err.value, Some(serde_json::json!("high")));
    }
}
