//! Session record.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::elapsed;

/// Number of random bytes in a session id (256 bits).
pub const SESSION_ID_BYTES: usize = 32;

/// Free-form key/value data attached to a session.
pub type SessionData = serde_json::Map<String, serde_json::Value>;

/// A user session.
///
/// The `session_id` is the only secret part; it never leaves the server
/// except inside the encrypted cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub ip_address: String,
    pub user_agent: String,
    pub is_active: bool,
    /// Selects the lifetime used for sliding renewal.
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub data: SessionData,
    /// `jti` of the token this session is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_sso_check: Option<OffsetDateTime>,
}

impl Session {
    /// Returns `true` if the session is active and not yet expired.
    #[must_use]
    pub fn is_usable_at(&self, now: OffsetDateTime) -> bool {
        self.is_active && now < self.expires_at
    }

    /// Time left until expiry, zero once expired.
    #[must_use]
    pub fn remaining(&self, now: OffsetDateTime) -> std::time::Duration {
        elapsed(self.expires_at, now)
    }

    /// Age since creation.
    #[must_use]
    pub fn age(&self, now: OffsetDateTime) -> std::time::Duration {
        elapsed(now, self.created_at)
    }

    /// Non-secret prefix of the session id, for logs.
    #[must_use]
    pub fn short_id(&self) -> &str {
        short_id(&self.session_id)
    }
}

/// Non-secret prefix of a session id, for logs.
#[must_use]
pub fn short_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

/// Generates a fresh session id: 32 bytes from the OS RNG, base64url.
#[must_use]
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Request context a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    #[must_use]
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use time::macros::datetime;

    fn sample() -> Session {
        Session {
            session_id: generate_session_id(),
            user_id: "u1".to_string(),
            created_at: datetime!(2024-05-01 10:00 UTC),
            last_accessed: datetime!(2024-05-01 10:00 UTC),
            expires_at: datetime!(2024-05-01 18:00 UTC),
            ip_address: "1.2.3.4".to_string(),
            user_agent: "Chrome".to_string(),
            is_active: true,
            remember_me: false,
            data: SessionData::new(),
            token_id: None,
            last_sso_check: None,
        }
    }

    #[test]
    fn test_session_ids_are_unique_and_urlsafe() {
        let ids: HashSet<_> = (0..256).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 256);
        for id in &ids {
            assert_eq!(id.len(), 43);
            assert!(
                id.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }
    }

    #[test]
    fn test_usability_and_timing() {
        let mut session = sample();
        let now = datetime!(2024-05-01 17:30 UTC);
        assert!(session.is_usable_at(now));
        assert_eq!(session.remaining(now), Duration::from_secs(1800));
        assert_eq!(session.age(now), Duration::from_secs(27000));

        assert!(!session.is_usable_at(datetime!(2024-05-01 18:00 UTC)));
        session.is_active = false;
        assert!(!session.is_usable_at(now));
    }

    #[test]
    fn test_serde_roundtrip_with_data() {
        let mut session = sample();
        session.data.insert("theme".into(), "dark".into());
        session.token_id = Some("jti-1".to_string());
        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abcdefghijkl"), "abcdefgh");
        assert_eq!(short_id("abc"), "abc");
    }
}
