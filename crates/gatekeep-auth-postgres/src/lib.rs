//! PostgreSQL storage backend for Gatekeep sessions.
//!
//! Provides [`PostgresSessionStorage`], a durable
//! [`SessionStorage`](gatekeep_auth::SessionStorage) shared by every server
//! instance. Multi-row writes run in one transaction; logins of one user
//! are serialized with a transaction-scoped advisory lock.
//!
//! # Example
//!
//! ```ignore
//! use gatekeep_auth_postgres::PostgresSessionStorage;
//!
//! let storage = PostgresSessionStorage::connect("postgres://localhost/gatekeep", 10).await?;
//! storage.migrate().await?;
//! let store = SessionStore::new(Arc::new(storage), config.session, clock);
//! ```

pub mod session;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

use gatekeep_auth::AuthError;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use session::PostgresSessionStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during session storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// A unique constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl StorageError {
    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a `CorruptRow` error.
    #[must_use]
    pub fn corrupt_row(message: impl Into<String>) -> Self {
        Self::CorruptRow(message.into())
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Classifies a database error, turning unique violations into
    /// `Conflict`.
    #[must_use]
    pub fn from_insert(error: sqlx_core::Error) -> Self {
        match &error {
            sqlx_core::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.constraint().unwrap_or("unique constraint").to_string())
            }
            _ => Self::Database(error),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Conflict(constraint) => {
                AuthError::conflict(format!("duplicate session row ({constraint})"))
            }
            other => AuthError::storage(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_auth_conflict() {
        let err: AuthError = StorageError::conflict("gatekeep_session_token_active").into();
        assert!(matches!(err, AuthError::Conflict { .. }));
        assert_eq!(err.kind(), "VALIDATION/conflict");
    }

    #[test]
    fn test_other_errors_map_to_storage() {
        let err: AuthError = StorageError::corrupt_row("data is not an object").into();
        assert!(matches!(err, AuthError::Storage { .. }));

        let err: AuthError = StorageError::from(sqlx_core::Error::RowNotFound).into();
        assert!(matches!(err, AuthError::Storage { .. }));
    }

    #[test]
    fn test_from_insert_passes_through_non_unique_errors() {
        let err = StorageError::from_insert(sqlx_core::Error::PoolTimedOut);
        assert!(!err.is_conflict());
    }
}
