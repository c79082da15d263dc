//! Custom error types for chainback
//!
//! This module defines the error hierarchy for the backup engine using thiserror
//! for ergonomic error definitions. The four engine-level categories are
//! configuration, integrity, protection and I/O; the remaining variants carry
//! failures from the collaborators the engine drives.

use thiserror::Error;

/// The main error type for chainback operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid or unreachable backup location, unreadable settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Corrupted manifest, broken chain reference, staged files not matching their record
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Deletion would violate the chain-survival rule
    #[error("Backup {record} is protected: {reason}")]
    Protected { record: String, reason: String },

    /// Disk full, permission denied, location unavailable mid-operation
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Database collaborator errors (checkpoint, open)
    #[error("Database error: {0}")]
    Database(String),

    /// Manifest storage errors (locking, atomic writes)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Post-backup command errors
    #[error("Command error: {0}")]
    Command(String),
}

impl BackupError {
    /// Create a "not found" error for backup records
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a protection error for a record
    pub fn protected(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protected {
            record: record.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a protection error
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Protected { .. })
    }

    /// Check if this is an integrity error
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<rusqlite::Error> for BackupError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for chainback operations
pub type BackupResult<T> = Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackupError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = BackupError::backup_not_found("bk-1234abcd");
        assert_eq!(err.to_string(), "Backup not found: bk-1234abcd");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_protected_error() {
        let err = BackupError::protected("bk-1234abcd", "2 incremental backup(s) depend on it");
        assert_eq!(
            err.to_string(),
            "Backup bk-1234abcd is protected: 2 incremental backup(s) depend on it"
        );
        assert!(err.is_protected());
        assert!(!err.is_integrity());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BackupError = io_err.into();
        assert!(matches!(err, BackupError::Io(_)));
    }
}
