//! Remote SSO authority.
//!
//! The authority is the system of record for single sign-on sessions. It
//! answers whether a local session is still backed by a live SSO session and
//! accepts logout notifications.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::config::SsoConfig;
use crate::error::AuthError;

/// Body of `POST /session/validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SsoValidationRequest {
    pub session_id: String,
    pub user_id: String,
    /// Hex SHA-256 of the bearer token, never the token itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<String>,
}

/// Answer of the authority.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteVerdict {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Failures talking to the authority. None of them is a verdict.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SsoCallError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for SsoCallError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// The SSO system of record.
#[async_trait]
pub trait SsoAuthority: Send + Sync {
    /// Asks whether the session is still backed by a live SSO session.
    async fn validate(&self, request: &SsoValidationRequest) -> Result<RemoteVerdict, SsoCallError>;

    /// Notifies the authority that a session ended.
    async fn invalidate(&self, session_id: &str, user_id: &str) -> Result<(), SsoCallError>;
}

#[derive(Serialize)]
struct InvalidateBody<'a> {
    session_id: &'a str,
    user_id: &'a str,
}

/// HTTP implementation of [`SsoAuthority`].
#[derive(Debug, Clone)]
pub struct HttpSsoAuthority {
    http: reqwest::Client,
    validate_url: Url,
    invalidate_url: Url,
}

impl HttpSsoAuthority {
    /// Creates a client for the authority at `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &SsoConfig) -> AuthResult<Self> {
        let base = config.base_url.trim_end_matches('/');
        let parse = |path: &str| {
            Url::parse(&format!("{base}{path}"))
                .map_err(|e| AuthError::configuration(format!("sso.base_url: {e}")))
        };
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            validate_url: parse("/session/validate")?,
            invalidate_url: parse("/session/invalidate")?,
        })
    }
}

#[async_trait]
impl SsoAuthority for HttpSsoAuthority {
    async fn validate(&self, request: &SsoValidationRequest) -> Result<RemoteVerdict, SsoCallError> {
        let response = self
            .http
            .post(self.validate_url.clone())
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SsoCallError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| SsoCallError::Malformed(e.to_string()))
    }

    async fn invalidate(&self, session_id: &str, user_id: &str) -> Result<(), SsoCallError> {
        let response = self
            .http
            .post(self.invalidate_url.clone())
            .json(&InvalidateBody {
                session_id,
                user_id,
            })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SsoCallError::Status(response.status().as_u16()))
        }
    }
}
