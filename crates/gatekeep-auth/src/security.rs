//! Per-request session security validation.
//!
//! Checks run in order and the first failure decides the verdict:
//!
//! 1. the request IP matches the one the session was created from
//! 2. the request User-Agent matches
//! 3. the session is younger than `absolute_max_session_age`
//! 4. the SSO authority still backs the session (rechecked at most every
//!    `sso.recheck_interval`; an unreachable authority never fails the check)
//!
//! A binding mismatch is [`Verdict::Suspicious`]: the caller must invalidate
//! the session and reject the request. Age and SSO failures are
//! [`Verdict::Expired`]: the session ends and the request continues
//! anonymously.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::{SharedClock, elapsed};
use crate::config::AuthConfig;
use crate::session::{ClientInfo, Session, SessionStore};
use crate::sso::SsoValidator;

/// Why a session looks hijacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionReason {
    IpMismatch,
    UaMismatch,
}

impl SuspicionReason {
    /// Stable reason code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::IpMismatch => "ip_mismatch",
            Self::UaMismatch => "ua_mismatch",
        }
    }
}

impl fmt::Display for SuspicionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a session ended without being suspicious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    TooOld,
    SsoInvalid,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooOld => f.write_str("too_old"),
            Self::SsoInvalid => f.write_str("sso_invalid"),
        }
    }
}

/// Outcome of a security check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Suspicious(SuspicionReason),
    Expired(ExpiryReason),
}

/// Tunables of the security check.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub bind_ip: bool,
    pub bind_user_agent: bool,
    pub absolute_max_session_age: Duration,
    pub sso_recheck_interval: Duration,
}

impl SecurityPolicy {
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            bind_ip: config.session.bind_ip,
            bind_user_agent: config.session.bind_user_agent,
            absolute_max_session_age: config.session.absolute_max_session_age,
            sso_recheck_interval: config.sso.recheck_interval,
        }
    }
}

/// Runs the ordered security checks for a loaded session.
#[derive(Debug)]
pub struct SecurityValidator {
    policy: SecurityPolicy,
    sso: Arc<SsoValidator>,
    store: Arc<SessionStore>,
    clock: SharedClock,
}

impl SecurityValidator {
    #[must_use]
    pub fn new(
        policy: SecurityPolicy,
        sso: Arc<SsoValidator>,
        store: Arc<SessionStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            policy,
            sso,
            store,
            clock,
        }
    }

    /// The SSO validator consulted by this check.
    #[must_use]
    pub fn sso(&self) -> &Arc<SsoValidator> {
        &self.sso
    }

    /// Checks `session` against the request context.
    ///
    /// A definitive SSO answer stamps `last_sso_check` on the session, both
    /// in `session` and in the store.
    pub async fn check(
        &self,
        session: &mut Session,
        client: &ClientInfo,
        token: Option<&str>,
    ) -> Verdict {
        if self.policy.bind_ip && session.ip_address != client.ip_address {
            tracing::warn!(
                user_id = %session.user_id,
                session = session.short_id(),
                expected_ip = %session.ip_address,
                actual_ip = %client.ip_address,
                "Session presented from a different IP address"
            );
            return Verdict::Suspicious(SuspicionReason::IpMismatch);
        }

        if self.policy.bind_user_agent && session.user_agent != client.user_agent {
            tracing::warn!(
                user_id = %session.user_id,
                session = session.short_id(),
                "Session presented with a different User-Agent"
            );
            return Verdict::Suspicious(SuspicionReason::UaMismatch);
        }

        let now = self.clock.now();
        if session.age(now) > self.policy.absolute_max_session_age {
            tracing::info!(
                user_id = %session.user_id,
                session = session.short_id(),
                "Session exceeded its absolute maximum age"
            );
            return Verdict::Expired(ExpiryReason::TooOld);
        }

        if !self.sso.is_enabled() {
            return Verdict::Valid;
        }
        let due = session
            .last_sso_check
            .is_none_or(|at| elapsed(now, at) >= self.policy.sso_recheck_interval);
        if !due {
            return Verdict::Valid;
        }

        let verdict = self
            .sso
            .validate(&session.session_id, &session.user_id, token)
            .await;
        if verdict.degraded {
            return Verdict::Valid;
        }

        session.last_sso_check = Some(now);
        if let Err(e) = self.store.mark_sso_checked(&session.session_id, now).await {
            tracing::debug!(session = session.short_id(), error = %e, "Could not stamp SSO check");
        }

        if verdict.valid {
            Verdict::Valid
        } else {
            Verdict::Expired(ExpiryReason::SsoInvalid)
        }
    }
}
