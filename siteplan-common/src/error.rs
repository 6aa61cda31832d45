//! Infrastructure errors shared by the siteplan crates
//!
//! Pipeline-level conditions (cost caps, rate limits, missing boundary data)
//! live in the service crate; this type covers storage, files, config and
//! request validation.

use std::fmt::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file unreadable, unparsable or failing validation
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// `NotFound` naming the kind of record and its id
    pub fn not_found(kind: &str, id: impl Display) -> Self {
        Error::NotFound(format!("{} {}", kind, id))
    }

    /// SQLite SQLITE_BUSY (5) or SQLITE_LOCKED (6), including extended codes
    pub fn is_lock_contention(&self) -> bool {
        let Error::Database(db_err) = self else {
            return false;
        };
        if let Some(code) = db_err.as_database_error().and_then(|e| e.code()) {
            if let Ok(code) = code.parse::<i64>() {
                return matches!(code & 0xff, 5 | 6);
            }
        }
        let msg = db_err.to_string();
        msg.contains("database is locked") || msg.contains("database is busy")
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_names_kind_and_id() {
        let err = Error::not_found("job", 42);
        assert_eq!(err.to_string(), "Not found: job 42");
    }

    #[test]
    fn test_only_database_errors_count_as_contention() {
        assert!(!Error::Internal("database is locked".to_string()).is_lock_contention());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_lock_contention());
    }

    #[test]
    fn test_json_errors_become_internal() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Internal(_)));
    }
}
