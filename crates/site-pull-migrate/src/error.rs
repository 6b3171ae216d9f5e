//! Error types for the pull-migration library.

use thiserror::Error;

/// Main error type for serve operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tracking store or source database error
    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    /// A request precondition failed (bad signature, missing root,
    /// missing database credentials). Fatal for the request, reported
    /// via status-false metadata with no body.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The request carried an unrecognized or missing `serve_type`.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Another request currently holds the serve lease for this migration.
    #[error("Migration busy: {0}")]
    Busy(String),

    /// Transfer failed for a specific unit
    #[error("Transfer failed for {unit}: {message}")]
    Transfer { unit: String, message: String },

    /// Corrupt or unexpected tracking-store state
    #[error("Tracking state error: {0}")]
    State(String),

    /// Archive creation error
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// IO error (file operations, streaming)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Content-policy pattern error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        MigrateError::Precondition(message.into())
    }

    /// Create a Transfer error for a named unit.
    pub fn transfer(unit: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Whether this error terminates the request before any body bytes.
    ///
    /// Per-unit failures never surface here; they are recorded against the
    /// unit and the batch continues.
    pub fn is_fatal_for_request(&self) -> bool {
        !matches!(self, MigrateError::Transfer { .. })
    }
}

/// Result type alias for serve operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_are_not_fatal() {
        let err = MigrateError::transfer("wp-content/a.txt", "unreadable");
        assert!(!err.is_fatal_for_request());
        assert!(MigrateError::precondition("bad signature").is_fatal_for_request());
    }
}
