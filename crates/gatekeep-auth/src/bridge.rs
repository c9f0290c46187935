//! Binding of bearer tokens to local sessions.
//!
//! API clients authenticate with JWTs, browser clients with the session
//! cookie. [`JwtSessionBridge`] gives every verified token exactly one local
//! session, keyed by the token's `jti`, so both paths share session state,
//! limits and revocation.
//!
//! The token's signature is not checked here: it must already have been
//! verified (by the identity provider) before [`JwtSessionBridge::sync`] is
//! called. Only `jti`, `exp` and `sub` are read.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::AuthResult;
use crate::clock::SharedClock;
use crate::error::AuthError;
use crate::identity::Identity;
use crate::session::{ClientInfo, Session, SessionStore};

#[derive(Debug, Deserialize)]
struct BridgeClaims {
    jti: Option<String>,
    exp: Option<i64>,
    sub: Option<String>,
}

/// Claims the bridge needs from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFacts {
    pub token_id: String,
    pub expires_at: OffsetDateTime,
    pub subject: Option<String>,
}

/// Reads `jti`, `exp` and `sub` from a JWT without verifying its signature.
///
/// # Errors
///
/// Returns `AuthError::InvalidToken` if the token is not a JWT or lacks
/// `jti` or `exp`.
pub fn inspect_token(token: &str) -> AuthResult<TokenFacts> {
    let claims = jsonwebtoken::dangerous::insecure_decode::<BridgeClaims>(token)
        .map_err(|e| AuthError::invalid_token(format!("malformed token: {e}")))?
        .claims;

    let token_id = claims
        .jti
        .filter(|jti| !jti.is_empty())
        .ok_or_else(|| AuthError::invalid_token("token has no jti claim"))?;
    let exp = claims
        .exp
        .ok_or_else(|| AuthError::invalid_token("token has no exp claim"))?;
    let expires_at = OffsetDateTime::from_unix_timestamp(exp)
        .map_err(|_| AuthError::invalid_token("token exp is out of range"))?;

    Ok(TokenFacts {
        token_id,
        expires_at,
        subject: claims.sub,
    })
}

/// Creates or reuses the session bound to a verified token.
pub struct JwtSessionBridge {
    store: Arc<SessionStore>,
    clock: SharedClock,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for JwtSessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSessionBridge")
            .field("in_flight", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl JwtSessionBridge {
    #[must_use]
    pub fn new(store: Arc<SessionStore>, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            locks: DashMap::new(),
        }
    }

    /// Returns the session bound to `token`, creating it on first use.
    ///
    /// Concurrent calls with the same token are serialized and all return
    /// the same session.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the token lacks `jti`/`exp`, names another
    ///   subject, or is already bound to another user's session
    /// - `TokenExpired` if `exp` has passed
    pub async fn sync(
        &self,
        token: &str,
        identity: &Identity,
        client: &ClientInfo,
    ) -> AuthResult<Session> {
        let facts = inspect_token(token)?;
        if facts.expires_at <= self.clock.now() {
            return Err(AuthError::TokenExpired);
        }
        if let Some(sub) = &facts.subject
            && sub != &identity.subject
        {
            return Err(AuthError::invalid_token(
                "token subject does not match the verified identity",
            ));
        }

        let lock = Arc::clone(self.locks.entry(facts.token_id.clone()).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            self.sync_locked(&facts, identity, client).await
        };
        drop(lock);
        self.locks
            .remove_if(&facts.token_id, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn sync_locked(
        &self,
        facts: &TokenFacts,
        identity: &Identity,
        client: &ClientInfo,
    ) -> AuthResult<Session> {
        if let Some(existing) = self.store.find_by_token_id(&facts.token_id).await? {
            ensure_owner(&existing, identity)?;
            return self.store.get(&existing.session_id).await;
        }

        let created = self
            .store
            .create_bound(
                &identity.subject,
                client,
                &facts.token_id,
                facts.expires_at,
                identity.summary(),
            )
            .await;

        match created {
            Ok(session) => Ok(session),
            // another instance bound the token first
            Err(AuthError::Conflict { .. }) => {
                let existing = self
                    .store
                    .find_by_token_id(&facts.token_id)
                    .await?
                    .ok_or(AuthError::SessionNotFound)?;
                ensure_owner(&existing, identity)?;
                Ok(existing)
            }
            Err(e) => Err(e),
        }
    }

    /// Ends the session bound to `token_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or the write fails.
    pub async fn release(&self, token_id: &str) -> AuthResult<bool> {
        match self.store.find_by_token_id(token_id).await? {
            Some(session) => self.store.invalidate(&session.session_id).await,
            None => Ok(false),
        }
    }
}

fn ensure_owner(session: &Session, identity: &Identity) -> AuthResult<()> {
    if session.user_id == identity.subject {
        Ok(())
    } else {
        tracing::warn!(
            bound_user = %session.user_id,
            presented_by = %identity.subject,
            "Token bound to another user's session"
        );
        Err(AuthError::invalid_token("token is bound to another user"))
    }
}
