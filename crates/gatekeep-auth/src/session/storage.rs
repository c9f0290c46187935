//! Durable session storage trait.
//!
//! [`SessionStorage`] is the cross-instance source of truth for sessions.
//! The [`SessionStore`](super::SessionStore) service layers lifetimes,
//! renewal and caching on top of it.
//!
//! # Implementation Notes
//!
//! Implementations must:
//!
//! - Make [`insert_capped`](SessionStorage::insert_capped) and
//!   [`replace`](SessionStorage::replace) atomic (one transaction or one lock
//!   section), so concurrent logins of one user never exceed the cap
//! - Keep at most one active, unexpired session per `token_id`
//! - Make every write durable before returning
//!
//! # Security Considerations
//!
//! - Session ids are bearer secrets; never log them in full
//! - Inactive rows may be kept for auditing until
//!   [`delete_expired`](SessionStorage::delete_expired) removes them

use async_trait::async_trait;
use time::OffsetDateTime;

use super::model::{Session, SessionData};
use crate::AuthResult;

/// Storage trait for user sessions.
///
/// # Implementations
///
/// - [`InMemorySessionStorage`](super::InMemorySessionStorage) - single node, tests
/// - `gatekeep-auth-postgres` - PostgreSQL backend
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Inserts a session, first deactivating the user's least recently
    /// accessed active sessions so that at most `max_active` remain
    /// including the new one.
    ///
    /// Active rows sharing the session's `token_id` that have already
    /// expired are deactivated as well.
    ///
    /// # Returns
    ///
    /// The ids of the evicted sessions.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Conflict` if the session id already exists or an
    /// unexpired active session is bound to the same `token_id`.
    async fn insert_capped(
        &self,
        session: &Session,
        max_active: usize,
        now: OffsetDateTime,
    ) -> AuthResult<Vec<String>>;

    /// Finds a session by id regardless of its state.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>>;

    /// Finds the active, unexpired session bound to `token_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_active_by_token(
        &self,
        token_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<Session>>;

    /// Records an access: sets `last_accessed` and `expires_at` on an
    /// active, unexpired session.
    ///
    /// # Returns
    ///
    /// `false` if the session is missing, inactive or expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn touch(
        &self,
        session_id: &str,
        last_accessed: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> AuthResult<bool>;

    /// Replaces the data map of an active session.
    ///
    /// # Returns
    ///
    /// `false` if the session is missing or inactive.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn set_data(&self, session_id: &str, data: &SessionData) -> AuthResult<bool>;

    /// Stamps the time of the last completed SSO check.
    ///
    /// # Returns
    ///
    /// `false` if the session is missing or inactive.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn set_sso_checked(&self, session_id: &str, at: OffsetDateTime) -> AuthResult<bool>;

    /// Marks a session inactive.
    ///
    /// # Returns
    ///
    /// `true` if an active session was deactivated.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn deactivate(&self, session_id: &str) -> AuthResult<bool>;

    /// Marks all of a user's sessions inactive.
    ///
    /// # Returns
    ///
    /// The ids of the sessions that were active.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn deactivate_user(&self, user_id: &str) -> AuthResult<Vec<String>>;

    /// Lists a user's active, unexpired sessions, most recently accessed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_active(&self, user_id: &str, now: OffsetDateTime) -> AuthResult<Vec<Session>>;

    /// Atomically deactivates `old_session_id` and inserts `replacement`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the old session is not active,
    /// in which case nothing is written.
    async fn replace(&self, old_session_id: &str, replacement: &Session) -> AuthResult<()>;

    /// Deletes inactive and expired sessions.
    ///
    /// # Returns
    ///
    /// The number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup operation fails.
    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
