//! Unified error type for the local store
//!
//! Every failure crossing the public API is a [`StoreError`]. Relational
//! errors keep their original cause as the error source so the sync driver
//! can inspect it before deciding on a retry policy.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Constraint violation: {message}")]
    Constraint {
        message: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {source}")]
    Database {
        #[source]
        source: rusqlite::Error,
    },

    #[error("Mutating statement issued inside a read-only unit of work")]
    ReadOnlyUnitOfWork,

    #[error("Unit of work requested while this thread already holds the store")]
    NestedUnitOfWork,

    #[error("MIME error: {0}")]
    Mime(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::FolderNotFound(_) | StoreError::MessageNotFound(_)
        )
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
            _ => None,
        };

        match code {
            Some(ErrorCode::ConstraintViolation) => StoreError::Constraint {
                message: err.to_string(),
                source: err,
            },
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
                | ErrorCode::PermissionDenied
                | ErrorCode::NotADatabase,
            ) => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Database { source: err },
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(err: toml::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<mailparse::MailParseError> for StoreError {
    fn from(err: mailparse::MailParseError) -> Self {
        StoreError::Mime(err.to_string())
    }
}

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_violation_is_constraint() {
        let conn = Connection::open_in_memory().expect("Failed to open connection");
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .expect("Failed to create table");

        let err: StoreError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .expect_err("Duplicate insert should fail")
            .into();

        assert!(err.is_constraint());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_other_errors_keep_cause() {
        let conn = Connection::open_in_memory().expect("Failed to open connection");
        let err: StoreError = conn
            .execute("SELECT * FROM missing_table", [])
            .expect_err("Query against a missing table should fail")
            .into();

        assert!(matches!(err, StoreError::Database { .. }));
        assert!(!err.is_not_found());
    }
}
