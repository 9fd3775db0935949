//! Error types for sqldeps.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for sqldeps operations.
#[derive(Debug, Error)]
pub enum SqlDepsError {
    /// Requested worker count is outside the usable range.
    #[error("Invalid worker count: {requested}. Expected -1 or a value between 1 and {available}")]
    InvalidWorkers { requested: i32, available: usize },

    /// Schema dialect has no schema source.
    #[error("Unsupported database dialect: '{0}'. Expected: postgresql")]
    UnsupportedDialect(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The extraction provider failed for one source.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The extraction provider returned something that is not a profile.
    #[error("Invalid provider response: {0}")]
    Response(String),

    /// Schema snapshot could not be retrieved.
    #[error("Schema unavailable: {0}")]
    Schema(String),

    /// A file or folder that must exist does not.
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqlDepsError {
    /// Create an invalid worker count error.
    pub fn invalid_workers(requested: i32, available: usize) -> Self {
        Self::InvalidWorkers {
            requested,
            available,
        }
    }

    /// Whether this error aborts a run before any work is dispatched.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidWorkers { .. } | Self::UnsupportedDialect(_) | Self::Config(_)
        )
    }
}

/// Result type alias for sqldeps operations.
pub type SqlDepsResult<T> = Result<T, SqlDepsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SqlDepsError::invalid_workers(9, 8);
        assert_eq!(
            err.to_string(),
            "Invalid worker count: 9. Expected -1 or a value between 1 and 8"
        );
        assert!(err.is_config());
    }

    #[test]
    fn test_not_found_display() {
        let err = SqlDepsError::NotFound(PathBuf::from("missing.sql"));
        assert_eq!(err.to_string(), "Path not found: missing.sql");
        assert!(!err.is_config());
    }
}
