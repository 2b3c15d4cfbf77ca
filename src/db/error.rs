//! Storage errors, classified once at the point sqlx reports them.

use std::time::Duration;

use thiserror::Error;

/// SQLite primary result codes that mean "another transaction got there first".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The transaction lost a race against a concurrent writer and can be re-run.
    #[error("serialization conflict (code {code}): {message}")]
    SerializationConflict { code: String, message: String },

    /// Pool exhausted, closed, or the connection failed.
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Query(#[source] sqlx::Error),
}

impl StoreError {
    pub fn is_serialization_conflict(&self) -> bool {
        matches!(self, StoreError::SerializationConflict { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                if code.as_deref().is_some_and(is_conflict_code) {
                    return StoreError::SerializationConflict {
                        code: code.unwrap_or_default(),
                        message: db_err.message().to_string(),
                    };
                }
                if db_err.is_unique_violation() {
                    return StoreError::UniqueViolation(db_err.message().to_string());
                }
                StoreError::Query(err)
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err)
            }
            _ => StoreError::Query(err),
        }
    }
}

/// Extended result codes keep the primary code in the low byte
/// (SQLITE_BUSY_SNAPSHOT = 517 = 5 | 2 << 8).
fn is_conflict_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

/// Error type a transactional unit of work may return.
///
/// The store needs to build it from its own failures and to recognise
/// conflicts that warrant re-running the unit of work.
pub trait TxError: From<StoreError> {
    fn is_serialization_conflict(&self) -> bool;
}

impl TxError for StoreError {
    fn is_serialization_conflict(&self) -> bool {
        StoreError::is_serialization_conflict(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_codes() {
        assert!(is_conflict_code("5"));
        assert!(is_conflict_code("6"));
        assert!(is_conflict_code("517"));
        assert!(is_conflict_code("262"));

        assert!(!is_conflict_code("19"));
        assert!(!is_conflict_code("2067"));
        assert!(!is_conflict_code("40001x"));
        assert!(!is_conflict_code(""));
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(StoreError::from(sqlx::Error::PoolClosed).is_unavailable());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_unavailable());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_serialization_conflict());
    }
}
