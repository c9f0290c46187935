//! # gatekeep-auth
//!
//! Resilient remote authentication and session lifecycle for Gatekeep.
//!
//! This crate provides:
//! - A circuit breaker shielding calls to the remote identity provider
//! - Remote token verification with blacklist checks
//! - An encrypted, durable session store with per-user limits, sliding
//!   renewal and fixation-defense regeneration
//! - A bridge giving every bearer token exactly one local session
//! - TTL-cached, fail-open SSO revalidation
//! - Per-request security validation and an axum session middleware
//!
//! ## Modules
//!
//! - [`breaker`] - Circuit breaker and breaker registry
//! - [`identity`] - Identity provider client, groups, token blacklist
//! - [`session`] - Session model, storage trait, lifecycle service, cookie
//! - [`bridge`] - JWT to session binding
//! - [`sso`] - SSO authority client and cached validator
//! - [`security`] - Ordered IP/UA/age/SSO checks
//! - [`middleware`] - Axum middleware, extractors and error responses
//! - [`config`] - Configuration types and validation
//! - [`clock`] - Injectable time source

pub mod breaker;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod security;
pub mod session;
pub mod sso;

pub use breaker::{BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use bridge::{JwtSessionBridge, TokenFacts, inspect_token};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use identity::{GroupRef, Identity, IdentityClient, NoBlacklist, TokenBlacklist};
pub use middleware::{
    CurrentSession, RequireSession, SessionHandle, SessionState, session_middleware,
};
pub use security::{ExpiryReason, SecurityPolicy, SecurityValidator, SuspicionReason, Verdict};
pub use session::{
    ClientInfo, InMemorySessionStorage, Session, SessionCookies, SessionData, SessionStorage,
    SessionStore,
};
pub use sso::{HttpSsoAuthority, SsoAuthority, SsoValidator, SsoVerdict};

/// Type alias for authentication and session results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use gatekeep_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::breaker::{BreakerRegistry, BreakerState, CircuitBreaker};
    pub use crate::bridge::JwtSessionBridge;
    pub use crate::clock::{SharedClock, system_clock};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::identity::{Identity, IdentityClient, TokenBlacklist};
    pub use crate::middleware::{
        CurrentSession, RequireSession, SessionHandle, SessionState, session_middleware,
    };
    pub use crate::security::{SecurityPolicy, SecurityValidator, Verdict};
    pub use crate::session::{ClientInfo, Session, SessionCookies, SessionStorage, SessionStore};
    pub use crate::sso::SsoValidator;
}
