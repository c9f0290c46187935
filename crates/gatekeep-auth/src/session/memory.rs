//! In-memory session storage.
//!
//! Single-node backend, used for development and tests. All operations take
//! one lock section, which gives the atomicity the trait asks for.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::model::{Session, SessionData};
use super::storage::SessionStorage;
use crate::AuthResult;
use crate::error::AuthError;

/// Session storage kept in process memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows, active or not.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn insert_capped(
        &self,
        session: &Session,
        max_active: usize,
        now: OffsetDateTime,
    ) -> AuthResult<Vec<String>> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(&session.session_id) {
            return Err(AuthError::conflict("session id already exists"));
        }

        if let Some(token_id) = &session.token_id {
            let bound = sessions
                .values_mut()
                .filter(|s| s.is_active && s.token_id.as_ref() == Some(token_id));
            for existing in bound {
                if existing.is_usable_at(now) {
                    return Err(AuthError::conflict("token already bound to a session"));
                }
                existing.is_active = false;
            }
        }

        let mut active: Vec<(OffsetDateTime, String)> = sessions
            .values()
            .filter(|s| s.user_id == session.user_id && s.is_usable_at(now))
            .map(|s| (s.last_accessed, s.session_id.clone()))
            .collect();
        active.sort();

        let overflow = (active.len() + 1).saturating_sub(max_active.max(1));
        let evicted: Vec<String> = active.into_iter().take(overflow).map(|(_, id)| id).collect();
        for id in &evicted {
            if let Some(s) = sessions.get_mut(id) {
                s.is_active = false;
            }
        }

        sessions.insert(session.session_id.clone(), session.clone());
        Ok(evicted)
    }

    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn find_active_by_token(
        &self,
        token_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.token_id.as_deref() == Some(token_id) && s.is_usable_at(now))
            .cloned())
    }

    async fn touch(
        &self,
        session_id: &str,
        last_accessed: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> AuthResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(s) if s.is_usable_at(last_accessed) => {
                s.last_accessed = last_accessed;
                s.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_data(&self, session_id: &str, data: &SessionData) -> AuthResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(s) if s.is_active => {
                s.data = data.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_sso_checked(&self, session_id: &str, at: OffsetDateTime) -> AuthResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(s) if s.is_active => {
                s.last_sso_check = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate(&self, session_id: &str) -> AuthResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(s) if s.is_active => {
                s.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_user(&self, user_id: &str) -> AuthResult<Vec<String>> {
        let mut sessions = self.sessions.write().await;
        let mut ids = Vec::new();
        for s in sessions
            .values_mut()
            .filter(|s| s.user_id == user_id && s.is_active)
        {
            s.is_active = false;
            ids.push(s.session_id.clone());
        }
        Ok(ids)
    }

    async fn list_active(&self, user_id: &str, now: OffsetDateTime) -> AuthResult<Vec<Session>> {
        let mut list: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.is_usable_at(now))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(list)
    }

    async fn replace(&self, old_session_id: &str, replacement: &Session) -> AuthResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&replacement.session_id) {
            return Err(AuthError::conflict("session id already exists"));
        }
        match sessions.get_mut(old_session_id) {
            Some(old) if old.is_active => old.is_active = false,
            _ => return Err(AuthError::SessionNotFound),
        }
        sessions.insert(replacement.session_id.clone(), replacement.clone());
        Ok(())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_usable_at(now));
        Ok((before - sessions.len()) as u64)
    }
}
