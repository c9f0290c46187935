//! Token blacklist query interface.
//!
//! The blacklist store itself lives outside this crate (it is typically
//! shared with whatever issues and revokes tokens). The identity client only
//! needs to ask whether a token has been revoked before calling out.

use async_trait::async_trait;

use crate::AuthResult;

/// Revocation lookup consulted before every remote verification.
///
/// # Example Implementation
///
/// ```ignore
/// use gatekeep_auth::identity::TokenBlacklist;
/// use gatekeep_auth::AuthResult;
///
/// struct InMemoryBlacklist {
///     revoked: std::sync::RwLock<std::collections::HashSet<String>>,
/// }
///
/// #[async_trait::async_trait]
/// impl TokenBlacklist for InMemoryBlacklist {
///     async fn is_blacklisted(&self, token: &str) -> AuthResult<bool> {
///         Ok(self.revoked.read().unwrap().contains(token))
///     }
/// }
/// ```
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// Returns `true` if the token has been revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the blacklist store cannot be queried. Callers
    /// treat that as a failure to authenticate, never as "not revoked".
    async fn is_blacklisted(&self, token: &str) -> AuthResult<bool>;
}

/// A blacklist that never matches. For deployments without revocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBlacklist;

#[async_trait]
impl TokenBlacklist for NoBlacklist {
    async fn is_blacklisted(&self, _token: &str) -> AuthResult<bool> {
        Ok(false)
    }
}
