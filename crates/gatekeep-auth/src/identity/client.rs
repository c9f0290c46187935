//! Bearer token verification against the remote identity provider.
//!
//! [`IdentityClient::verify`] checks the local revocation blacklist, then
//! calls `GET {base_url}/userinfo` through the circuit breaker. Response
//! statuses are classified so that only connectivity problems feed the
//! breaker:
//!
//! | Outcome                         | Error                          |
//! |---------------------------------|--------------------------------|
//! | 200 with a valid body           | none                           |
//! | 401, other 4xx                  | `InvalidToken` (authentication)|
//! | 403                             | `Forbidden` (authorization)    |
//! | 5xx, timeout, connect failure   | `Connectivity`                 |
//! | malformed body, empty subject   | `InvalidResponse` (validation) |

use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AuthResult;
use crate::breaker::CircuitBreaker;
use crate::config::IdentityProviderConfig;
use crate::error::AuthError;
use crate::identity::blacklist::TokenBlacklist;
use crate::identity::groups::GroupRef;

const SERVICE: &str = "identity_provider";

/// Verified identity returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier.
    #[serde(rename = "sub")]
    pub subject: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, alias = "admin")]
    pub is_admin: bool,

    #[serde(default)]
    pub groups: Vec<GroupRef>,
}

impl Identity {
    /// Compact summary stored alongside a session.
    #[must_use]
    pub fn summary(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("sub".into(), self.subject.clone().into());
        if let Some(email) = &self.email {
            map.insert("email".into(), email.clone().into());
        }
        if let Some(name) = &self.name {
            map.insert("name".into(), name.clone().into());
        }
        map.insert("is_admin".into(), self.is_admin.into());
        map.insert(
            "groups".into(),
            self.groups
                .iter()
                .map(|g| serde_json::Value::from(g.name()))
                .collect::<Vec<_>>()
                .into(),
        );
        map
    }
}

/// Client for the identity provider's userinfo endpoint.
pub struct IdentityClient {
    http: reqwest::Client,
    userinfo_url: Url,
    breaker: Arc<CircuitBreaker>,
    blacklist: Arc<dyn TokenBlacklist>,
}

impl std::fmt::Debug for IdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityClient")
            .field("userinfo_url", &self.userinfo_url.as_str())
            .field("breaker", &self.breaker.name())
            .finish_non_exhaustive()
    }
}

impl IdentityClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the base URL is invalid or uses a
    /// scheme that is not allowed, or if the HTTP client cannot be built.
    pub fn new(
        config: &IdentityProviderConfig,
        breaker: Arc<CircuitBreaker>,
        blacklist: Arc<dyn TokenBlacklist>,
    ) -> AuthResult<Self> {
        let base = config.base_url.trim_end_matches('/');
        let userinfo_url = Url::parse(&format!("{base}/userinfo"))
            .map_err(|e| AuthError::configuration(format!("idp.base_url: {e}")))?;
        if userinfo_url.scheme() != "https" && !(config.allow_http && userinfo_url.scheme() == "http")
        {
            return Err(AuthError::configuration(
                "idp.base_url must use https".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            userinfo_url,
            breaker,
            blacklist,
        })
    }

    /// The breaker guarding this client.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Verifies a bearer token and returns the identity behind it.
    ///
    /// # Errors
    ///
    /// - `TokenRevoked` if the token is blacklisted (no network call is made)
    /// - `ServiceUnavailable` if the breaker is open
    /// - see the module table for provider outcomes
    pub async fn verify(&self, token: &str) -> AuthResult<Identity> {
        if token.trim().is_empty() {
            return Err(AuthError::invalid_token("empty bearer token"));
        }

        if self.blacklist.is_blacklisted(token).await? {
            tracing::warn!("Rejected blacklisted token");
            return Err(AuthError::TokenRevoked);
        }

        let identity = self
            .breaker
            .execute(|| self.fetch_userinfo(token))
            .await?;

        tracing::debug!(subject = %identity.subject, "Token verified");
        Ok(identity)
    }

    async fn fetch_userinfo(&self, token: &str) -> AuthResult<Identity> {
        let response = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED => {
                return Err(AuthError::invalid_token("rejected by identity provider"));
            }
            StatusCode::FORBIDDEN => {
                return Err(AuthError::forbidden("denied by identity provider"));
            }
            s if s.is_server_error() => {
                tracing::warn!(status = s.as_u16(), "Identity provider server error");
                return Err(AuthError::connectivity(SERVICE, format!("HTTP {s}")));
            }
            s => {
                return Err(AuthError::invalid_token(format!(
                    "identity provider returned {s}"
                )));
            }
        }

        let body = response.bytes().await.map_err(transport_error)?;
        let identity: Identity = serde_json::from_slice(&body)
            .map_err(|e| AuthError::invalid_response(SERVICE, e.to_string()))?;

        if identity.subject.trim().is_empty() {
            return Err(AuthError::invalid_response(SERVICE, "empty subject"));
        }
        Ok(identity)
    }
}

fn transport_error(e: reqwest::Error) -> AuthError {
    if e.is_decode() {
        AuthError::invalid_response(SERVICE, e.to_string())
    } else if e.is_timeout() {
        AuthError::connectivity(SERVICE, "request timed out")
    } else {
        AuthError::connectivity(SERVICE, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use crate::clock::ManualClock;
    use crate::config::BreakerConfig;
    use crate::identity::blacklist::NoBlacklist;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct RevokedSet(Vec<String>);

    #[async_trait]
    impl TokenBlacklist for RevokedSet {
        async fn is_blacklisted(&self, token: &str) -> AuthResult<bool> {
            Ok(self.0.iter().any(|t| t == token))
        }
    }

    fn client_for(
        server: &MockServer,
        threshold: u32,
        blacklist: Arc<dyn TokenBlacklist>,
    ) -> (IdentityClient, ManualClock) {
        let clock = ManualClock::starting_now();
        let breaker = Arc::new(CircuitBreaker::new(
            "idp",
            &BreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_secs(30),
            },
            Arc::new(clock.clone()),
        ));
        let config = IdentityProviderConfig {
            base_url: format!("{}/", server.uri()),
            request_timeout: Duration::from_millis(300),
            allow_http: true,
        };
        (
            IdentityClient::new(&config, breaker, blacklist).unwrap(),
            clock,
        )
    }

    #[tokio::test]
    async fn test_verify_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "u1",
                "email": "u1@example.com",
                "admin": true,
                "groups": ["ops", {"name": "dev", "id": "bad"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client_for(&server, 3, Arc::new(NoBlacklist));
        let identity = client.verify("good").await.unwrap();
        assert_eq!(identity.subject, "u1");
        assert!(identity.is_admin);
        assert_eq!(identity.groups.len(), 2);
        assert_eq!(identity.summary()["groups"], json!(["ops", "dev"]));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        for (token, status) in [("t401", 401), ("t403", 403), ("t404", 404), ("t502", 502)] {
            Mock::given(method("GET"))
                .and(path("/userinfo"))
                .and(header("authorization", format!("Bearer {token}").as_str()))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }
        let (client, _) = client_for(&server, 10, Arc::new(NoBlacklist));

        assert!(matches!(
            client.verify("t401").await,
            Err(AuthError::InvalidToken { .. })
        ));
        assert!(matches!(
            client.verify("t403").await,
            Err(AuthError::Forbidden { .. })
        ));
        assert!(matches!(
            client.verify("t404").await,
            Err(AuthError::InvalidToken { .. })
        ));
        assert_eq!(client.breaker().failure_count(), 0);

        assert!(matches!(
            client.verify("t502").await,
            Err(AuthError::Connectivity { .. })
        ));
        assert_eq!(client.breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "x"})))
            .mount(&server)
            .await;

        let (client, _) = client_for(&server, 1, Arc::new(NoBlacklist));
        let err = client.verify("tok").await.unwrap_err();
        assert_eq!(err.kind(), "VALIDATION/malformed_response");
        assert_eq!(client.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_blacklisted_token_never_calls_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (client, _) = client_for(
            &server,
            3,
            Arc::new(RevokedSet(vec!["revoked".to_string()])),
        );
        assert!(matches!(
            client.verify("revoked").await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_connectivity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"sub": "u1"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let (client, _) = client_for(&server, 3, Arc::new(NoBlacklist));
        let err = client.verify("slow").await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(client.breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_breaker_scenario() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(3)
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "u1"})))
            .expect(1)
            .mount(&server)
            .await;

        let (client, clock) = client_for(&server, 3, Arc::new(NoBlacklist));
        for _ in 0..3 {
            assert!(matches!(
                client.verify("tok").await,
                Err(AuthError::Connectivity { .. })
            ));
        }

        let err = client.verify("tok").await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable { .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);

        clock.advance(Duration::from_secs(31));
        let identity = client.verify("tok").await.unwrap();
        assert_eq!(identity.subject, "u1");
        assert_eq!(client.breaker().state(), BreakerState::Closed);
    }

    #[test]
    fn test_rejects_plain_http_by_default() {
        let config = IdentityProviderConfig {
            base_url: "http://id.example.com".to_string(),
            ..Default::default()
        };
        let breaker = Arc::new(CircuitBreaker::new(
            "idp",
            &BreakerConfig::default(),
            Arc::new(ManualClock::starting_now()),
        ));
        let err = IdentityClient::new(&config, breaker, Arc::new(NoBlacklist)).unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }
}
