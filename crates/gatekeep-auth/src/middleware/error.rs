//! Error response handling.
//!
//! `AuthError` renders as
//! `{"error": {"kind", "category", "message", "advice"}}` with a status
//! derived from its category.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{AuthError, ErrorCategory};

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(kind = %self.kind(), error = %self, "Request failed");
        }

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = build_www_authenticate_header(self.reason_code(), &self.to_string());
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }
        if let Some(retry) = self.retry_after() {
            headers.insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry.as_secs().max(1)),
            );
        }

        (status, headers, Json(error_body(&self))).into_response()
    }
}

/// HTTP status for an error.
fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
        AuthError::Conflict { .. } => StatusCode::CONFLICT,
        _ => match error.category() {
            ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
            ErrorCategory::Authorization => StatusCode::FORBIDDEN,
            ErrorCategory::Connectivity => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Configuration | ErrorCategory::System => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
    }
}

/// JSON body for an error.
///
/// Server-side failures report a generic message; details stay in the log.
#[must_use]
pub fn error_body(error: &AuthError) -> serde_json::Value {
    let message = match error.category() {
        ErrorCategory::Configuration | ErrorCategory::System => "Internal server error".to_string(),
        _ => error.to_string(),
    };
    json!({
        "error": {
            "kind": error.kind(),
            "category": error.category().to_string(),
            "message": message,
            "advice": error.advice(),
        }
    })
}

/// Format: `Bearer realm="gatekeep", error="invalid_token", error_description="..."`
fn build_www_authenticate_header(error: &str, description: &str) -> String {
    let escaped_desc = description.replace('\"', "\\\"");
    format!("Bearer realm=\"gatekeep\", error=\"{error}\", error_description=\"{escaped_desc}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SuspicionReason;
    use axum::body::to_bytes;
    use std::time::Duration;

    async fn body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_security_violation_response() {
        let response = AuthError::security_violation(SuspicionReason::IpMismatch).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(www_auth.contains("realm=\"gatekeep\""));
        assert!(www_auth.contains("error=\"ip_mismatch\""));

        let json = body(response).await;
        assert_eq!(json["error"]["kind"], "AUTHENTICATION/ip_mismatch");
        assert_eq!(json["error"]["category"], "authentication");
        assert_eq!(json["error"]["advice"], "Please sign in again.");
    }

    #[tokio::test]
    async fn test_circuit_open_response() {
        let response =
            AuthError::service_unavailable("identity_provider", Duration::from_secs(17))
                .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "17");
        assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));

        let json = body(response).await;
        assert_eq!(json["error"]["kind"], "CONNECTIVITY/circuit_open");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (AuthError::forbidden("no"), StatusCode::FORBIDDEN),
            (
                AuthError::invalid_response("identity_provider", "bad json"),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AuthError::connectivity("identity_provider", "refused"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AuthError::conflict("dup"), StatusCode::CONFLICT),
            (AuthError::SessionNotFound, StatusCode::UNAUTHORIZED),
            (AuthError::storage("db down"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_internal_details_not_exposed() {
        let json = body(AuthError::storage("password=hunter2").into_response()).await;
        assert_eq!(json["error"]["message"], "Internal server error");
        assert_eq!(json["error"]["kind"], "SYSTEM/storage_failure");
    }

    #[test]
    fn test_www_authenticate_header_escaping() {
        let header = build_www_authenticate_header("invalid_token", "Token contains \"quotes\"");
        assert!(header.contains("\\\"quotes\\\""));
    }
}
