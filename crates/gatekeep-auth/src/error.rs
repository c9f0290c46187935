//! Authentication and session error types.
//!
//! Every error maps onto an [`ErrorCategory`] and carries a stable,
//! machine-readable [`kind`](AuthError::kind) of the form `CATEGORY/reason`
//! together with advice that can be shown to the end user.

use std::fmt;
use std::time::Duration;

use crate::security::SuspicionReason;

/// Errors that can occur while authenticating requests and managing sessions.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The bearer token is invalid, malformed, or was rejected by the provider.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// The token is on the revocation blacklist.
    #[error("Token revoked")]
    TokenRevoked,

    /// The request lacks valid authentication credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The session was presented from a context that does not match the one
    /// it was created in.
    #[error("Security violation: {reason}")]
    SecurityViolation {
        /// Which binding check failed.
        reason: SuspicionReason,
    },

    /// The session does not exist, is inactive, or has expired.
    #[error("Session not found")]
    SessionNotFound,

    /// The authenticated user is not permitted to perform the action.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// A remote service is shielded by an open circuit breaker.
    #[error("Service unavailable: {service} (retry after {}s)", retry_after.as_secs())]
    ServiceUnavailable {
        /// Name of the breaker / remote service.
        service: String,
        /// How long until the breaker admits a trial call.
        retry_after: Duration,
    },

    /// A remote service could not be reached, timed out, or failed with 5xx.
    #[error("Connectivity error: {service} - {message}")]
    Connectivity {
        /// Name of the remote service.
        service: String,
        /// Description of the failure.
        message: String,
    },

    /// A remote service answered with a payload that could not be understood.
    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        /// Name of the remote service.
        service: String,
        /// Description of the decoding failure.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An error occurred while storing or retrieving session data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// A uniqueness constraint was violated by a concurrent write.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `SecurityViolation` error.
    #[must_use]
    pub fn security_violation(reason: SuspicionReason) -> Self {
        Self::SecurityViolation { reason }
    }

    /// Creates a new `ServiceUnavailable` error.
    #[must_use]
    pub fn service_unavailable(service: impl Into<String>, retry_after: Duration) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            retry_after,
        }
    }

    /// Creates a new `Connectivity` error.
    #[must_use]
    pub fn connectivity(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    #[must_use]
    pub fn invalid_response(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken { .. }
                | Self::TokenExpired
                | Self::TokenRevoked
                | Self::Unauthorized { .. }
                | Self::SecurityViolation { .. }
                | Self::SessionNotFound
                | Self::Forbidden { .. }
                | Self::Conflict { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns `true` for failures that say nothing about the caller and
    /// everything about the reachability of a remote service.
    ///
    /// Only these count toward opening a circuit breaker.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. } | Self::ServiceUnavailable { .. }
        )
    }

    /// Returns the retry delay for errors that carry one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ServiceUnavailable { retry_after, .. } => Some(*retry_after),
            Self::Connectivity { .. } => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    /// Returns the error category for logging and client reporting.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidToken { .. }
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::Unauthorized { .. }
            | Self::SecurityViolation { .. }
            | Self::SessionNotFound => ErrorCategory::Authentication,
            Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::ServiceUnavailable { .. } | Self::Connectivity { .. } => {
                ErrorCategory::Connectivity
            }
            Self::InvalidResponse { .. } | Self::Conflict { .. } => ErrorCategory::Validation,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Storage { .. } | Self::Internal { .. } => ErrorCategory::System,
        }
    }

    /// Returns the reason half of [`kind`](Self::kind).
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidToken { .. } => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
            Self::Unauthorized { .. } => "unauthorized",
            Self::SecurityViolation { reason } => reason.code(),
            Self::SessionNotFound => "session_not_found",
            Self::Forbidden { .. } => "access_denied",
            Self::ServiceUnavailable { .. } => "circuit_open",
            Self::Connectivity { .. } => "unreachable",
            Self::InvalidResponse { .. } => "malformed_response",
            Self::Configuration { .. } => "invalid_configuration",
            Self::Storage { .. } => "storage_failure",
            Self::Conflict { .. } => "conflict",
            Self::Internal { .. } => "internal",
        }
    }

    /// Returns the stable error kind, e.g. `AUTHENTICATION/ip_mismatch`.
    #[must_use]
    pub fn kind(&self) -> String {
        format!("{}/{}", self.category().as_code(), self.reason_code())
    }

    /// Returns advice suitable for showing to the end user.
    #[must_use]
    pub fn advice(&self) -> String {
        match self.category() {
            ErrorCategory::Authentication => "Please sign in again.".to_string(),
            ErrorCategory::Authorization => {
                "Contact an administrator if you believe you should have access.".to_string()
            }
            ErrorCategory::Connectivity => {
                let secs = self.retry_after().map_or(5, |d| d.as_secs().max(1));
                format!("The authentication service is temporarily unavailable. Retry in {secs} seconds.")
            }
            ErrorCategory::Validation => {
                "The authentication service returned an unexpected response. Retry later."
                    .to_string()
            }
            ErrorCategory::Configuration | ErrorCategory::System => {
                "An internal error occurred. Contact an administrator.".to_string()
            }
        }
    }
}

/// Categories of authentication errors for logging and client reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity could not be established or the session is not trusted.
    Authentication,
    /// Identity is known but not permitted.
    Authorization,
    /// A remote service is unreachable or shielded by a breaker.
    Connectivity,
    /// A remote payload or write could not be accepted.
    Validation,
    /// Invalid configuration.
    Configuration,
    /// Storage and internal failures.
    System,
}

impl ErrorCategory {
    /// Upper-case code used as the prefix of an error kind.
    #[must_use]
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Authentication => "AUTHENTICATION",
            Self::Authorization => "AUTHORIZATION",
            Self::Connectivity => "CONNECTIVITY",
            Self::Validation => "VALIDATION",
            Self::Configuration => "CONFIGURATION",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Connectivity => write!(f, "connectivity"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
            Self::System => write!(f, "system"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_token("signature mismatch");
        assert_eq!(err.to_string(), "Invalid token: signature mismatch");

        let err = AuthError::service_unavailable("idp", Duration::from_secs(12));
        assert_eq!(err.to_string(), "Service unavailable: idp (retry after 12s)");

        let err = AuthError::security_violation(SuspicionReason::IpMismatch);
        assert_eq!(err.to_string(), "Security violation: ip_mismatch");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            AuthError::security_violation(SuspicionReason::IpMismatch).kind(),
            "AUTHENTICATION/ip_mismatch"
        );
        assert_eq!(
            AuthError::security_violation(SuspicionReason::UaMismatch).kind(),
            "AUTHENTICATION/ua_mismatch"
        );
        assert_eq!(
            AuthError::service_unavailable("idp", Duration::from_secs(3)).kind(),
            "CONNECTIVITY/circuit_open"
        );
        assert_eq!(
            AuthError::invalid_response("idp", "missing sub").kind(),
            "VALIDATION/malformed_response"
        );
        assert_eq!(
            AuthError::forbidden("no").kind(),
            "AUTHORIZATION/access_denied"
        );
    }

    #[test]
    fn test_error_predicates() {
        let err = AuthError::connectivity("idp", "connection refused");
        assert!(err.is_connectivity());
        assert!(err.is_server_error());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));

        let err = AuthError::invalid_response("idp", "bad json");
        assert!(!err.is_connectivity());
        assert!(err.is_server_error());

        let err = AuthError::TokenRevoked;
        assert!(err.is_client_error());
        assert!(!err.is_connectivity());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_error_advice() {
        assert!(AuthError::SessionNotFound.advice().contains("sign in"));
        assert!(AuthError::forbidden("x").advice().contains("administrator"));
        assert!(
            AuthError::service_unavailable("idp", Duration::from_secs(17))
                .advice()
                .contains("17 seconds")
        );
    }
}
