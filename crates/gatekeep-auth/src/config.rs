//! Authentication and session configuration.
//!
//! All sections deserialize with `#[serde(default)]`, so a configuration file
//! only needs to name the values it changes. Durations use humantime notation
//! (`"30s"`, `"8h"`, `"30d"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::cookie::parse_key;

/// Root configuration for the authentication layer.
///
/// # Example (TOML)
///
/// ```toml
/// [auth.idp]
/// base_url = "https://id.example.com"
///
/// [auth.session]
/// session_lifetime = "8h"
/// max_sessions_per_user = 5
///
/// [auth.cookie]
/// encryption_key = "<64 hex characters>"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Circuit breaker around identity verification.
    pub breaker: BreakerConfig,

    /// Remote identity provider.
    pub idp: IdentityProviderConfig,

    /// Session lifetimes, limits and bindings.
    pub session: SessionConfig,

    /// SSO revalidation.
    pub sso: SsoConfig,

    /// Session cookie attributes and encryption.
    pub cookie: CookieConfig,

    /// Session middleware behavior.
    pub middleware: MiddlewareConfig,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive connectivity failures that open the breaker.
    pub failure_threshold: u32,

    /// How long the breaker stays open before admitting a trial call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Remote identity provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityProviderConfig {
    /// Base URL; `/userinfo` is appended.
    pub base_url: String,

    /// Timeout for a single verification request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Permit plain `http://` base URLs (local development only).
    pub allow_http: bool,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Duration::from_secs(5),
            allow_http: false,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a regular session.
    #[serde(with = "humantime_serde")]
    pub session_lifetime: Duration,

    /// Lifetime of a "remember me" session.
    #[serde(with = "humantime_serde")]
    pub remember_me_lifetime: Duration,

    /// Maximum number of concurrently active sessions per user.
    /// The least recently accessed session is evicted on overflow.
    pub max_sessions_per_user: usize,

    /// Sessions closer than this to expiry are extended on access.
    #[serde(with = "humantime_serde")]
    pub renewal_threshold: Duration,

    /// Hard cap on session age regardless of renewals.
    #[serde(with = "humantime_serde")]
    pub absolute_max_session_age: Duration,

    /// Interval of the background expiry sweep.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// TTL of the per-instance read-through cache. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub local_cache_ttl: Duration,

    /// Reject sessions presented from a different IP address.
    pub bind_ip: bool,

    /// Reject sessions presented with a different User-Agent.
    pub bind_user_agent: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_lifetime: Duration::from_secs(8 * 3600), // 8 hours
            remember_me_lifetime: Duration::from_secs(30 * 24 * 3600), // 30 days
            max_sessions_per_user: 5,
            renewal_threshold: Duration::from_secs(30 * 60), // 30 minutes
            absolute_max_session_age: Duration::from_secs(30 * 24 * 3600), // 30 days
            cleanup_interval: Duration::from_secs(15 * 60), // 15 minutes
            local_cache_ttl: Duration::ZERO,
            bind_ip: true,
            bind_user_agent: true,
        }
    }
}

impl SessionConfig {
    /// Lifetime applied at creation and on renewal.
    #[must_use]
    pub fn lifetime(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_lifetime
        } else {
            self.session_lifetime
        }
    }
}

/// SSO revalidation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SsoConfig {
    /// Revalidate sessions against the SSO authority.
    pub enabled: bool,

    /// Base URL of the SSO authority.
    pub base_url: String,

    /// How long a definitive verdict is cached.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Minimum interval between revalidations of one session.
    #[serde(with = "humantime_serde")]
    pub recheck_interval: Duration,

    /// Timeout for a single SSO request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            cache_ttl: Duration::from_secs(300),        // 5 minutes
            recheck_interval: Duration::from_secs(300), // 5 minutes
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// `SameSite` attribute of the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    #[default]
    Strict,
    Lax,
    None,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name.
    pub name: String,

    /// Emit the `Secure` attribute. May be turned off only with
    /// `idp.allow_http`.
    pub secure: bool,

    /// Emit the `HttpOnly` attribute.
    pub http_only: bool,

    /// `SameSite` attribute. Only `strict` passes validation.
    pub same_site: SameSitePolicy,

    /// Cookie path.
    pub path: String,

    /// Optional cookie domain.
    pub domain: Option<String>,

    /// AES-256 key, hex (64 chars) or base64 (32 bytes decoded).
    /// Required.
    #[serde(skip_serializing)]
    pub encryption_key: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "gk_session".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSitePolicy::Strict,
            path: "/".to_string(),
            domain: None,
            encryption_key: String::new(),
        }
    }
}

/// Session middleware configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Paths that bypass session handling (exact match).
    pub exempt_paths: Vec<String>,

    /// Path prefixes that bypass session handling.
    pub exempt_prefixes: Vec<String>,

    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
    /// Enable only behind a proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            exempt_paths: vec![
                "/healthz".to_string(),
                "/readyz".to_string(),
                "/favicon.ico".to_string(),
            ],
            exempt_prefixes: vec!["/docs/".to_string(), "/public/".to_string()],
            trust_forwarded_headers: false,
        }
    }
}

impl MiddlewareConfig {
    /// Returns `true` if the path bypasses session handling.
    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
            || self
                .exempt_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the identity provider URL or the
    /// cookie encryption key is absent, and `ConfigError::InvalidValue` for
    /// zero limits, malformed URLs or an inconsistent renewal window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "breaker.failure_threshold must be > 0".to_string(),
            ));
        }
        if self.breaker.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "breaker.timeout must be > 0".to_string(),
            ));
        }

        if self.idp.base_url.is_empty() {
            return Err(ConfigError::Missing("idp.base_url".to_string()));
        }
        validate_url("idp.base_url", &self.idp.base_url, self.idp.allow_http)?;
        if self.idp.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "idp.request_timeout must be > 0".to_string(),
            ));
        }

        let session = &self.session;
        if session.session_lifetime.is_zero() || session.remember_me_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session lifetimes must be > 0".to_string(),
            ));
        }
        if session.max_sessions_per_user == 0 {
            return Err(ConfigError::InvalidValue(
                "session.max_sessions_per_user must be > 0".to_string(),
            ));
        }
        if session.renewal_threshold >= session.session_lifetime {
            return Err(ConfigError::InvalidValue(format!(
                "session.renewal_threshold ({}s) must be shorter than session.session_lifetime ({}s)",
                session.renewal_threshold.as_secs(),
                session.session_lifetime.as_secs()
            )));
        }
        if session.absolute_max_session_age.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.absolute_max_session_age must be > 0".to_string(),
            ));
        }
        if session.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.cleanup_interval must be > 0".to_string(),
            ));
        }

        if self.sso.enabled {
            if self.sso.base_url.is_empty() {
                return Err(ConfigError::Missing("sso.base_url".to_string()));
            }
            validate_url("sso.base_url", &self.sso.base_url, self.idp.allow_http)?;
            if self.sso.request_timeout.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "sso.request_timeout must be > 0".to_string(),
                ));
            }
        }

        if self.cookie.name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "cookie.name cannot be empty".to_string(),
            ));
        }
        if !self.cookie.http_only {
            return Err(ConfigError::InvalidValue(
                "cookie.http_only cannot be disabled".to_string(),
            ));
        }
        if self.cookie.same_site != SameSitePolicy::Strict {
            return Err(ConfigError::InvalidValue(
                "cookie.same_site must be \"strict\"".to_string(),
            ));
        }
        // plain-http development setups only
        if !self.cookie.secure && !self.idp.allow_http {
            return Err(ConfigError::InvalidValue(
                "cookie.secure can only be disabled together with idp.allow_http".to_string(),
            ));
        }
        if self.cookie.encryption_key.is_empty() {
            return Err(ConfigError::Missing("cookie.encryption_key".to_string()));
        }
        parse_key(&self.cookie.encryption_key).map_err(|e| {
            ConfigError::InvalidValue(format!("cookie.encryption_key: {e}"))
        })?;

        Ok(())
    }
}

fn validate_url(field: &str, value: &str, allow_http: bool) -> Result<(), ConfigError> {
    let url = url::Url::parse(value)
        .map_err(|e| ConfigError::InvalidValue(format!("{field}: {e}")))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        other => Err(ConfigError::InvalidValue(format!(
            "{field}: scheme '{other}' is not allowed"
        ))),
    }
}
