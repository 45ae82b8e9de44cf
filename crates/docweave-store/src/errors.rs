//! Error helpers for docweave-store
//!
//! Everything surfaces as `DocweaveError::Persistence` or
//! `DocweaveError::Serialization` so the reconcile loop classifies store
//! failures like any other document error.

use docweave_core::errors::DocweaveError;

/// Result type alias shared with docweave-core
pub type Result<T> = docweave_core::errors::Result<T>;

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> DocweaveError {
    DocweaveError::Persistence {
        op: "sqlite".to_string(),
        message: err.to_string(),
    }
}

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> DocweaveError {
    DocweaveError::Persistence {
        op: "migration".to_string(),
        message: format!("Migration {} failed: {}", migration_id, reason),
    }
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> DocweaveError {
    DocweaveError::Persistence {
        op: "migration_checksum".to_string(),
        message: format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ),
    }
}

/// Create a digest mismatch error for a stored structure
pub fn digest_mismatch(owner: &str, expected: &str, actual: &str) -> DocweaveError {
    DocweaveError::Persistence {
        op: "structure_load".to_string(),
        message: format!(
            "Digest mismatch for structure of {}: expected {}, got {}",
            owner, expected, actual
        ),
    }
}

/// Create a JSON error for a stored column
pub fn invalid_json(column: &str, err: serde_json::Error) -> DocweaveError {
    DocweaveError::Serialization {
        message: format!("invalid JSON in column {}: {}", column, err),
    }
}
