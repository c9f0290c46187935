//! TTL-cached SSO revalidation.
//!
//! ## Cache
//!
//! Definitive verdicts from the authority are cached per
//! `(user_id, session_id)` for `sso.cache_ttl`. Concurrent misses for the same
//! key may both call out; the last answer wins.
//!
//! ## Degradation
//!
//! If the authority cannot be reached, times out, or answers with anything
//! other than a well-formed 2xx, the session is treated as valid (fail-open)
//! and nothing is cached, so the next check tries again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::authority::{HttpSsoAuthority, SsoAuthority, SsoValidationRequest};
use crate::AuthResult;
use crate::clock::{SharedClock, elapsed};
use crate::config::SsoConfig;
use crate::session::short_id;

/// Reason reported when SSO revalidation is switched off.
pub const SSO_DISABLED_REASON: &str = "sso disabled";

/// Result of an SSO validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SsoVerdict {
    pub valid: bool,
    pub reason: Option<String>,
    pub from_cache: bool,
    /// The authority could not give an answer; `valid` is a fail-open default.
    pub degraded: bool,
}

impl SsoVerdict {
    /// Returns `true` for an answer actually given by the authority.
    #[must_use]
    pub fn is_definitive(&self) -> bool {
        !self.degraded
    }
}

struct CacheEntry {
    valid: bool,
    reason: Option<String>,
    cached_at: OffsetDateTime,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SsoStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Validations answered fail-open.
    pub degraded: u64,
}

impl SsoStats {
    /// Hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// SSO validator with a per-instance verdict cache.
pub struct SsoValidator {
    authority: Option<Arc<dyn SsoAuthority>>,
    ttl: Duration,
    clock: SharedClock,
    cache: DashMap<(String, String), CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    degraded: AtomicU64,
}

impl std::fmt::Debug for SsoValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoValidator")
            .field("enabled", &self.is_enabled())
            .field("ttl", &self.ttl)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl SsoValidator {
    /// Creates a validator. `None` disables revalidation.
    #[must_use]
    pub fn new(authority: Option<Arc<dyn SsoAuthority>>, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            authority,
            ttl,
            clock,
            cache: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
        }
    }

    /// A validator that approves everything without calling out.
    #[must_use]
    pub fn disabled(clock: SharedClock) -> Self {
        Self::new(None, Duration::ZERO, clock)
    }

    /// Builds the validator from configuration, with the HTTP authority
    /// when `sso.enabled` is set.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the authority URL is invalid.
    pub fn from_config(config: &SsoConfig, clock: SharedClock) -> AuthResult<Self> {
        if !config.enabled {
            return Ok(Self::disabled(clock));
        }
        let authority: Arc<dyn SsoAuthority> = Arc::new(HttpSsoAuthority::new(config)?);
        Ok(Self::new(Some(authority), config.cache_ttl, clock))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.authority.is_some()
    }

    /// Validates a session against the SSO authority.
    ///
    /// Never fails: an unreachable authority yields a degraded, valid verdict.
    pub async fn validate(&self, session_id: &str, user_id: &str, token: Option<&str>) -> SsoVerdict {
        let Some(authority) = &self.authority else {
            return SsoVerdict {
                valid: true,
                reason: Some(SSO_DISABLED_REASON.to_string()),
                from_cache: false,
                degraded: false,
            };
        };

        let key = (user_id.to_string(), session_id.to_string());
        let now = self.clock.now();
        if let Some(entry) = self.cache.get(&key) {
            if elapsed(now, entry.cached_at) < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return SsoVerdict {
                    valid: entry.valid,
                    reason: entry.reason.clone(),
                    from_cache: true,
                    degraded: false,
                };
            }
            drop(entry);
            self.cache.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let request = SsoValidationRequest {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            token_hash: token.map(hash_token),
        };

        match authority.validate(&request).await {
            Ok(verdict) => {
                if !verdict.valid {
                    tracing::warn!(
                        user_id = %user_id,
                        session = short_id(session_id),
                        reason = verdict.reason.as_deref().unwrap_or("unspecified"),
                        "SSO authority reports session invalid"
                    );
                }
                self.cache.insert(
                    key,
                    CacheEntry {
                        valid: verdict.valid,
                        reason: verdict.reason.clone(),
                        cached_at: self.clock.now(),
                    },
                );
                SsoVerdict {
                    valid: verdict.valid,
                    reason: verdict.reason,
                    from_cache: false,
                    degraded: false,
                }
            }
            Err(e) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    user_id = %user_id,
                    session = short_id(session_id),
                    error = %e,
                    "SSO authority unavailable, allowing session"
                );
                SsoVerdict {
                    valid: true,
                    reason: Some(format!("sso unavailable: {e}")),
                    from_cache: false,
                    degraded: true,
                }
            }
        }
    }

    /// Drops the cached verdict and notifies the authority.
    ///
    /// The local entry is purged whether or not the notification succeeds.
    ///
    /// # Returns
    ///
    /// `true` if the authority acknowledged the notification.
    pub async fn invalidate(&self, session_id: &str, user_id: &str) -> bool {
        let key = (user_id.to_string(), session_id.to_string());
        self.cache.remove(&key);

        let Some(authority) = &self.authority else {
            return false;
        };
        let acknowledged = match authority.invalidate(session_id, user_id).await {
            Ok(()) => {
                tracing::info!(
                    user_id = %user_id,
                    session = short_id(session_id),
                    "SSO session invalidated"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    session = short_id(session_id),
                    error = %e,
                    "SSO invalidation failed"
                );
                false
            }
        };

        // a validation racing with the notification may have re-populated it
        self.cache.remove(&key);
        acknowledged
    }

    /// Purges cached verdicts for one user, or all of them.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn clear_cache(&self, user_id: Option<&str>) -> usize {
        let before = self.cache.len();
        match user_id {
            Some(user_id) => self.cache.retain(|(user, _), _| user != user_id),
            None => self.cache.clear(),
        }
        before.saturating_sub(self.cache.len())
    }

    /// Removes entries older than the TTL.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.cache.retain(|_, entry| {
            if elapsed(now, entry.cached_at) < self.ttl {
                true
            } else {
                removed += 1;
                false
            }
        });
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    #[must_use]
    pub fn stats(&self) -> SsoStats {
        SsoStats {
            size: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// Hex SHA-256 of a token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
