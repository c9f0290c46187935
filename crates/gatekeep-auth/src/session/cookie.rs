//! Encrypted session cookie.
//!
//! The cookie carries only the session id, encrypted with AES-256-GCM under a
//! fresh random 96-bit nonce. The value is `base64url(nonce || ciphertext)`.
//! Anything that fails to decode or authenticate is treated as "no session".

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::CookieJar;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use cookie::{Cookie, SameSite};
use rand::RngCore;
use rand::rngs::OsRng;
use time::OffsetDateTime;

use super::model::Session;
use crate::AuthResult;
use crate::config::{CookieConfig, SameSitePolicy};
use crate::error::AuthError;

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
pub const KEY_SIZE: usize = 32;

/// GCM authentication tag size
const TAG_SIZE: usize = 16;

/// Errors from parsing an encryption key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    #[error("invalid hex key: {0}")]
    Hex(String),

    #[error("invalid base64 key: {0}")]
    Base64(String),

    #[error("key must be {KEY_SIZE} bytes, got {0}")]
    Length(usize),
}

/// Parses a key from a hex (64 characters) or base64 string.
///
/// # Errors
///
/// Returns a `KeyError` if the string is neither valid hex nor base64, or
/// does not decode to exactly 32 bytes.
pub fn parse_key(key_str: &str) -> Result<[u8; KEY_SIZE], KeyError> {
    let key_str = key_str.trim();
    let bytes = if key_str.len() == KEY_SIZE * 2 && key_str.chars().all(|c| c.is_ascii_hexdigit())
    {
        hex::decode(key_str).map_err(|e| KeyError::Hex(e.to_string()))?
    } else {
        BASE64
            .decode(key_str)
            .map_err(|e| KeyError::Base64(e.to_string()))?
    };

    <[u8; KEY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| KeyError::Length(bytes.len()))
}

/// Generates a new random key.
#[must_use]
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// Authenticated encryption of cookie values.
#[derive(Clone)]
pub struct CookieCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CookieCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CookieCipher(..)")
    }
}

impl CookieCipher {
    #[must_use]
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Encrypts `plaintext` under a fresh nonce.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if encryption fails.
    pub fn encrypt(&self, plaintext: &str) -> AuthResult<String> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| AuthError::internal(format!("cookie encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypts a value produced by [`encrypt`](Self::encrypt).
    ///
    /// Returns `None` on any decoding, authentication or UTF-8 failure.
    #[must_use]
    pub fn decrypt(&self, value: &str) -> Option<String> {
        let raw = URL_SAFE_NO_PAD.decode(value).ok()?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return None;
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}

/// Outcome of reading the session cookie from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieRead {
    /// No session cookie was sent.
    Absent,
    /// A cookie was sent but could not be decrypted.
    Invalid,
    /// The decrypted session id.
    Session(String),
}

/// Reads and writes the session cookie.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    cipher: CookieCipher,
    config: CookieConfig,
}

impl SessionCookies {
    #[must_use]
    pub fn new(cipher: CookieCipher, config: CookieConfig) -> Self {
        Self { cipher, config }
    }

    /// Builds the cookie codec from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the encryption key is invalid.
    pub fn from_config(config: &CookieConfig) -> AuthResult<Self> {
        let key = parse_key(&config.encryption_key)
            .map_err(|e| AuthError::configuration(format!("cookie.encryption_key: {e}")))?;
        Ok(Self::new(CookieCipher::new(&key), config.clone()))
    }

    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Extracts the session id from request headers.
    #[must_use]
    pub fn read(&self, headers: &HeaderMap) -> CookieRead {
        let jar = CookieJar::from_headers(headers);
        match jar.get(&self.config.name) {
            None => CookieRead::Absent,
            Some(cookie) => match self.cipher.decrypt(cookie.value()) {
                Some(session_id) if !session_id.is_empty() => CookieRead::Session(session_id),
                _ => CookieRead::Invalid,
            },
        }
    }

    /// Builds a `Set-Cookie` value for `session`, with `Max-Age` matching
    /// the time left until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails or the cookie is not a valid
    /// header value.
    pub fn issue(&self, session: &Session, now: OffsetDateTime) -> AuthResult<HeaderValue> {
        let value = self.cipher.encrypt(&session.session_id)?;
        let max_age = i64::try_from(session.remaining(now).as_secs()).unwrap_or(i64::MAX);
        self.render(value, max_age)
    }

    /// Builds a `Set-Cookie` value that removes the cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie is not a valid header value.
    pub fn clear(&self) -> AuthResult<HeaderValue> {
        self.render(String::new(), 0)
    }

    fn render(&self, value: String, max_age_secs: i64) -> AuthResult<HeaderValue> {
        let mut builder = Cookie::build((self.config.name.clone(), value))
            .http_only(self.config.http_only)
            .secure(self.config.secure)
            .same_site(match self.config.same_site {
                SameSitePolicy::Strict => SameSite::Strict,
                SameSitePolicy::Lax => SameSite::Lax,
                SameSitePolicy::None => SameSite::None,
            })
            .path(self.config.path.clone())
            .max_age(time::Duration::seconds(max_age_secs));
        if let Some(domain) = &self.config.domain {
            builder = builder.domain(domain.clone());
        }

        HeaderValue::from_str(&builder.build().to_string())
            .map_err(|e| AuthError::internal(format!("invalid Set-Cookie value: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{SessionData, generate_session_id};
    use axum::http::header::COOKIE;
    use time::macros::datetime;

    fn cookies() -> SessionCookies {
        let config = CookieConfig {
            encryption_key: hex::encode(generate_key()),
            ..Default::default()
        };
        SessionCookies::from_config(&config).unwrap()
    }

    #[test]
    fn test_parse_key_formats() {
        let key = generate_key();
        assert_eq!(parse_key(&hex::encode(key)).unwrap(), key);
        assert_eq!(parse_key(&BASE64.encode(key)).unwrap(), key);
        assert!(matches!(parse_key("c2hvcnQ="), Err(KeyError::Length(5))));
        assert!(parse_key("not a key!").is_err());
    }

    #[test]
    fn test_encrypt_uses_fresh_nonce() {
        let cipher = CookieCipher::new(&generate_key());
        let a = cipher.encrypt("session-1").unwrap();
        let b = cipher.encrypt("session-1").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).as_deref(), Some("session-1"));
        assert_eq!(cipher.decrypt(&b).as_deref(), Some("session-1"));
    }

    #[test]
    fn test_tampered_or_foreign_values_decrypt_to_none() {
        let cipher = CookieCipher::new(&generate_key());
        let other = CookieCipher::new(&generate_key());
        let value = cipher.encrypt("session-1").unwrap();

        assert!(other.decrypt(&value).is_none());
        assert!(cipher.decrypt("").is_none());
        assert!(cipher.decrypt("!!!").is_none());
        assert!(cipher.decrypt(&URL_SAFE_NO_PAD.encode([0u8; 20])).is_none());

        let mut raw = URL_SAFE_NO_PAD.decode(&value).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(cipher.decrypt(&URL_SAFE_NO_PAD.encode(raw)).is_none());
    }

    #[test]
    fn test_issue_and_read_back() {
        let cookies = cookies();
        let now = datetime!(2024-05-01 12:00 UTC);
        let session = Session {
            session_id: generate_session_id(),
            user_id: "u1".to_string(),
            created_at: now,
            last_accessed: now,
            expires_at: now + time::Duration::hours(1),
            ip_address: "1.2.3.4".to_string(),
            user_agent: "Chrome".to_string(),
            is_active: true,
            remember_me: false,
            data: SessionData::new(),
            token_id: None,
            last_sso_check: None,
        };

        let set_cookie = cookies.issue(&session, now).unwrap();
        let set_cookie = set_cookie.to_str().unwrap();
        assert!(set_cookie.starts_with("gk_session="));
        assert!(set_cookie.contains("Max-Age=3600"));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("SameSite=Strict"));
        assert!(set_cookie.contains("Path=/"));

        let pair = set_cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&format!("other=1; {pair}")).unwrap());
        assert_eq!(cookies.read(&headers), CookieRead::Session(session.session_id));
    }

    #[test]
    fn test_read_absent_and_invalid() {
        let cookies = cookies();
        assert_eq!(cookies.read(&HeaderMap::new()), CookieRead::Absent);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("gk_session=garbage"));
        assert_eq!(cookies.read(&headers), CookieRead::Invalid);
    }

    #[test]
    fn test_clear_expires_immediately() {
        let cleared = cookies().clear().unwrap();
        let cleared = cleared.to_str().unwrap();
        assert!(cleared.starts_with("gk_session=;"));
        assert!(cleared.contains("Max-Age=0"));
    }
}
