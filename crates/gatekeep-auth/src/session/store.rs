//! Session lifecycle service.
//!
//! [`SessionStore`] applies lifetimes, the per-user cap, sliding renewal and
//! fixation-defense regeneration on top of a durable [`SessionStorage`].
//!
//! Writes that touch several rows (evict-then-insert, regenerate) are spawned
//! on the store's [`TaskTracker`] and awaited. If the request future that
//! asked for the write is dropped, the write still runs to completion, and
//! [`SessionStore::shutdown`] waits for all of them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio_util::task::TaskTracker;

use super::model::{ClientInfo, Session, SessionData, generate_session_id, short_id};
use super::storage::SessionStorage;
use crate::AuthResult;
use crate::clock::{SharedClock, elapsed, to_time_duration};
use crate::config::SessionConfig;
use crate::error::AuthError;

struct CachedSession {
    session: Session,
    cached_at: OffsetDateTime,
}

/// Session lifecycle service over a durable backend.
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    config: SessionConfig,
    clock: SharedClock,
    local: DashMap<String, CachedSession>,
    writes: TaskTracker,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("cached", &self.local.len())
            .field("pending_writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>, config: SessionConfig, clock: SharedClock) -> Self {
        Self {
            storage,
            config,
            clock,
            local: DashMap::new(),
            writes: TaskTracker::new(),
        }
    }

    /// Session configuration in effect.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Tracker of in-flight compound writes.
    #[must_use]
    pub fn tracker(&self) -> &TaskTracker {
        &self.writes
    }

    /// Creates a session for a freshly authenticated user.
    ///
    /// Evicts the user's least recently accessed sessions so the total stays
    /// within `max_sessions_per_user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be written.
    pub async fn create(
        &self,
        user_id: &str,
        client: &ClientInfo,
        remember_me: bool,
    ) -> AuthResult<Session> {
        self.create_with_data(user_id, client, remember_me, SessionData::new())
            .await
    }

    /// Like [`create`](Self::create), with `data` written in the same insert.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be written.
    pub async fn create_with_data(
        &self,
        user_id: &str,
        client: &ClientInfo,
        remember_me: bool,
        data: SessionData,
    ) -> AuthResult<Session> {
        let now = self.clock.now();
        let session = Session {
            session_id: generate_session_id(),
            user_id: user_id.to_string(),
            created_at: now,
            last_accessed: now,
            expires_at: now + to_time_duration(self.config.lifetime(remember_me)),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            is_active: true,
            remember_me,
            data,
            token_id: None,
            last_sso_check: None,
        };
        self.insert(session, now).await
    }

    /// Creates a session bound to a token id.
    ///
    /// The session expires at the earlier of the regular lifetime and
    /// `not_after` (normally the token's `exp`), and is never renewed past it.
    ///
    /// # Errors
    ///
    /// - `TokenExpired` if `not_after` is not in the future
    /// - `Conflict` if another active session is bound to `token_id`
    pub async fn create_bound(
        &self,
        user_id: &str,
        client: &ClientInfo,
        token_id: &str,
        not_after: OffsetDateTime,
        data: SessionData,
    ) -> AuthResult<Session> {
        let now = self.clock.now();
        if not_after <= now {
            return Err(AuthError::TokenExpired);
        }
        let expires_at = (now + to_time_duration(self.config.session_lifetime)).min(not_after);
        let session = Session {
            session_id: generate_session_id(),
            user_id: user_id.to_string(),
            created_at: now,
            last_accessed: now,
            expires_at,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            is_active: true,
            remember_me: false,
            data,
            token_id: Some(token_id.to_string()),
            last_sso_check: None,
        };
        self.insert(session, now).await
    }

    async fn insert(&self, session: Session, now: OffsetDateTime) -> AuthResult<Session> {
        let storage = Arc::clone(&self.storage);
        let max = self.config.max_sessions_per_user;
        let record = session.clone();
        let evicted = self
            .tracked(async move { storage.insert_capped(&record, max, now).await })
            .await?;

        for id in &evicted {
            self.local.remove(id);
            tracing::info!(
                user_id = %session.user_id,
                evicted = short_id(id),
                "Session evicted by per-user limit"
            );
        }
        self.cache_put(&session, now);

        tracing::debug!(
            user_id = %session.user_id,
            session = session.short_id(),
            bound = session.token_id.is_some(),
            "Session created"
        );
        Ok(session)
    }

    /// Returns an active, unexpired session and records the access.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the session is missing,
    /// inactive or expired.
    pub async fn get(&self, session_id: &str) -> AuthResult<Session> {
        self.load(session_id).await.map(|(session, _)| session)
    }

    /// Like [`get`](Self::get), also reporting whether the expiry was
    /// extended so the caller can refresh the cookie.
    ///
    /// Unbound sessions closer than `renewal_threshold` to expiry are
    /// extended to `now + lifetime`, never past
    /// `created_at + absolute_max_session_age`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the session is missing,
    /// inactive or expired.
    pub async fn load(&self, session_id: &str) -> AuthResult<(Session, bool)> {
        let now = self.clock.now();
        let mut session = match self.cache_get(session_id, now) {
            Some(session) => session,
            None => self
                .storage
                .find(session_id)
                .await?
                .ok_or(AuthError::SessionNotFound)?,
        };

        if !session.is_usable_at(now) {
            self.local.remove(session_id);
            return Err(AuthError::SessionNotFound);
        }

        let mut renewed = false;
        if session.token_id.is_none() && session.remaining(now) < self.config.renewal_threshold {
            let extended = self.sliding_expiry(&session, now);
            if extended > session.expires_at {
                session.expires_at = extended;
                renewed = true;
            }
        }
        session.last_accessed = now;

        if !self
            .storage
            .touch(session_id, now, session.expires_at)
            .await?
        {
            self.local.remove(session_id);
            return Err(AuthError::SessionNotFound);
        }
        self.cache_put(&session, now);

        if renewed {
            tracing::debug!(session = session.short_id(), "Session renewed");
        }
        Ok((session, renewed))
    }

    /// Ends a session.
    ///
    /// # Returns
    ///
    /// `true` if an active session was ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn invalidate(&self, session_id: &str) -> AuthResult<bool> {
        self.local.remove(session_id);
        let ended = self.storage.deactivate(session_id).await?;
        if ended {
            tracing::info!(session = short_id(session_id), "Session invalidated");
        }
        Ok(ended)
    }

    /// Ends all sessions of a user.
    ///
    /// # Returns
    ///
    /// The number of sessions ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn invalidate_all(&self, user_id: &str) -> AuthResult<usize> {
        let ids = self.storage.deactivate_user(user_id).await?;
        for id in &ids {
            self.local.remove(id);
        }
        self.local.retain(|_, cached| cached.session.user_id != user_id);
        tracing::info!(user_id = %user_id, count = ids.len(), "All user sessions invalidated");
        Ok(ids.len())
    }

    /// Lists a user's active sessions, most recently accessed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn list(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        self.storage.list_active(user_id, self.clock.now()).await
    }

    /// Deletes inactive and expired sessions.
    ///
    /// # Returns
    ///
    /// The number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup fails.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        let now = self.clock.now();
        self.local.retain(|_, cached| cached.session.is_usable_at(now));
        let deleted = self.storage.delete_expired(now).await?;
        if deleted > 0 {
            tracing::debug!(deleted, "Expired sessions removed");
        }
        Ok(deleted)
    }

    /// Replaces a session with a new id, keeping its user, data and token
    /// binding. The old id stops working immediately.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the session is not active.
    pub async fn regenerate(&self, session_id: &str, client: &ClientInfo) -> AuthResult<Session> {
        let now = self.clock.now();
        let old = self
            .storage
            .find(session_id)
            .await?
            .filter(|s| s.is_usable_at(now))
            .ok_or(AuthError::SessionNotFound)?;

        let expires_at = if old.token_id.is_some() {
            old.expires_at
        } else {
            self.sliding_expiry(&old, now).max(old.expires_at)
        };
        let replacement = Session {
            session_id: generate_session_id(),
            last_accessed: now,
            expires_at,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            is_active: true,
            ..old
        };

        let storage = Arc::clone(&self.storage);
        let old_id = session_id.to_string();
        let record = replacement.clone();
        self.tracked(async move { storage.replace(&old_id, &record).await })
            .await?;

        self.local.remove(session_id);
        self.cache_put(&replacement, now);
        tracing::info!(
            user_id = %replacement.user_id,
            old = short_id(session_id),
            new = replacement.short_id(),
            "Session regenerated"
        );
        Ok(replacement)
    }

    /// Replaces the data map of an active session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the session is not active.
    pub async fn update_data(&self, session_id: &str, data: SessionData) -> AuthResult<()> {
        self.local.remove(session_id);
        let storage = Arc::clone(&self.storage);
        let id = session_id.to_string();
        let updated = self
            .tracked(async move { storage.set_data(&id, &data).await })
            .await?;
        if updated {
            Ok(())
        } else {
            Err(AuthError::SessionNotFound)
        }
    }

    /// Records a completed SSO check.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionNotFound` if the session is not active.
    pub async fn mark_sso_checked(&self, session_id: &str, at: OffsetDateTime) -> AuthResult<()> {
        if let Some(mut cached) = self.local.get_mut(session_id) {
            cached.session.last_sso_check = Some(at);
        }
        if self.storage.set_sso_checked(session_id, at).await? {
            Ok(())
        } else {
            self.local.remove(session_id);
            Err(AuthError::SessionNotFound)
        }
    }

    /// Finds the active session bound to a token id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn find_by_token_id(&self, token_id: &str) -> AuthResult<Option<Session>> {
        self.storage
            .find_active_by_token(token_id, self.clock.now())
            .await
    }

    /// Stops accepting tracked writes and waits for the outstanding ones.
    pub async fn shutdown(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.local.clear();
    }

    fn sliding_expiry(&self, session: &Session, now: OffsetDateTime) -> OffsetDateTime {
        let renewed = now + to_time_duration(self.config.lifetime(session.remember_me));
        let hard_cap = session.created_at + to_time_duration(self.config.absolute_max_session_age);
        renewed.min(hard_cap)
    }

    async fn tracked<T, F>(&self, write: F) -> AuthResult<T>
    where
        T: Send + 'static,
        F: Future<Output = AuthResult<T>> + Send + 'static,
    {
        self.writes
            .spawn(write)
            .await
            .map_err(|e| AuthError::internal(format!("session write task failed: {e}")))?
    }

    fn cache_ttl(&self) -> Option<Duration> {
        (!self.config.local_cache_ttl.is_zero()).then_some(self.config.local_cache_ttl)
    }

    fn cache_get(&self, session_id: &str, now: OffsetDateTime) -> Option<Session> {
        let ttl = self.cache_ttl()?;
        let entry = self.local.get(session_id)?;
        if elapsed(now, entry.cached_at) < ttl {
            Some(entry.session.clone())
        } else {
            drop(entry);
            self.local.remove(session_id);
            None
        }
    }

    fn cache_put(&self, session: &Session, now: OffsetDateTime) {
        if self.cache_ttl().is_some() {
            self.local.insert(
                session.session_id.clone(),
                CachedSession {
                    session: session.clone(),
                    cached_at: now,
                },
            );
        }
    }
}
