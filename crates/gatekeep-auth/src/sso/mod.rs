//! Single sign-on revalidation.
//!
//! - [`SsoAuthority`] - the remote system of record, with an HTTP implementation
//! - [`SsoValidator`] - TTL-cached, fail-open validation

pub mod authority;
pub mod validator;

pub use authority::{
    HttpSsoAuthority, RemoteVerdict, SsoAuthority, SsoCallError, SsoValidationRequest,
};
pub use validator::{SSO_DISABLED_REASON, SsoStats, SsoValidator, SsoVerdict, hash_token};
