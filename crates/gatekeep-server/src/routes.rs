//! HTTP handlers for login, logout and session management.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use gatekeep_auth::{
    AuthError, AuthResult, CurrentSession, RequireSession, Session, Verdict, inspect_token,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub remember_me: bool,
}

/// A session as shown to its owner. The id is truncated.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub ip_address: String,
    pub user_agent: String,
    pub remember_me: bool,
    pub current: bool,
}

impl SessionView {
    fn new(session: &Session, current_id: Option<&str>) -> Self {
        Self {
            id: session.short_id().to_string(),
            created_at: session.created_at,
            last_accessed: session.last_accessed,
            expires_at: session.expires_at,
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            remember_me: session.remember_me,
            current: current_id == Some(session.session_id.as_str()),
        }
    }
}

pub async fn healthz(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "breakers": app.breakers.snapshots(),
        "sso": app.sso.stats(),
    }))
}

pub async fn readyz() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}

/// Exchanges a bearer token for a cookie session.
///
/// A token carrying `jti` and `exp` gets a session bound to it; an opaque
/// token gets a regular session. An existing session on the request is
/// ended first.
pub async fn login(
    State(app): State<AppState>,
    current: CurrentSession,
    headers: HeaderMap,
    body: Bytes,
) -> AuthResult<Response> {
    let request: LoginRequest = if body.is_empty() {
        LoginRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => return Ok(malformed_request(&e.to_string())),
        }
    };

    let token = bearer_token(&headers)?;
    let identity = app.identity.verify(token).await?;

    let session = match inspect_token(token) {
        Ok(_) => app.bridge.sync(token, &identity, &current.client).await?,
        Err(_) => {
            app.store
                .create_with_data(
                    &identity.subject,
                    &current.client,
                    request.remember_me,
                    identity.summary(),
                )
                .await?
        }
    };

    if let Some(previous) = &current.session
        && previous.session_id != session.session_id
    {
        app.store.invalidate(&previous.session_id).await?;
    }

    tracing::info!(
        user_id = %identity.subject,
        session = session.short_id(),
        bound = session.token_id.is_some(),
        "Login"
    );
    let body = json!({
        "user": identity,
        "expires_at": format_time(session.expires_at),
        "remember_me": session.remember_me,
    });
    current.handle.establish(session);
    Ok(Json(body).into_response())
}

pub async fn logout(State(app): State<AppState>, current: CurrentSession) -> AuthResult<Json<Value>> {
    let Some(session) = current.session else {
        current.handle.end();
        return Ok(Json(json!({ "logged_out": false })));
    };

    let ended = app.store.invalidate(&session.session_id).await?;
    app.sso.invalidate(&session.session_id, &session.user_id).await;
    current.handle.end();
    tracing::info!(user_id = %session.user_id, session = session.short_id(), "Logout");
    Ok(Json(json!({ "logged_out": ended })))
}

pub async fn logout_all(
    State(app): State<AppState>,
    current: CurrentSession,
) -> AuthResult<Json<Value>> {
    let session = current
        .session
        .ok_or_else(|| AuthError::unauthorized("Authentication required"))?;

    let ended = app.store.invalidate_all(&session.user_id).await?;
    app.sso.clear_cache(Some(&session.user_id));
    current.handle.end();
    tracing::info!(user_id = %session.user_id, ended, "Logged out everywhere");
    Ok(Json(json!({ "sessions_ended": ended })))
}

pub async fn list_sessions(
    State(app): State<AppState>,
    RequireSession(session): RequireSession,
) -> AuthResult<Json<Vec<SessionView>>> {
    let sessions = app.store.list(&session.user_id).await?;
    Ok(Json(
        sessions
            .iter()
            .map(|s| SessionView::new(s, Some(&session.session_id)))
            .collect(),
    ))
}

pub async fn me(RequireSession(session): RequireSession) -> Json<Value> {
    Json(json!({
        "user_id": session.user_id,
        "data": session.data,
        "expires_at": format_time(session.expires_at),
        "remember_me": session.remember_me,
    }))
}

/// Issues a fresh session id for the current session.
pub async fn rotate(State(app): State<AppState>, current: CurrentSession) -> AuthResult<Json<Value>> {
    let session = current
        .session
        .ok_or_else(|| AuthError::unauthorized("Authentication required"))?;

    let rotated = app
        .store
        .regenerate(&session.session_id, &current.client)
        .await?;
    let body = json!({ "expires_at": format_time(rotated.expires_at) });
    current.handle.establish(rotated);
    Ok(Json(body))
}

/// Bearer-only endpoint: resolves the token's bound session without a
/// cookie and runs the same security checks as the session middleware.
pub async fn whoami(
    State(app): State<AppState>,
    current: CurrentSession,
    headers: HeaderMap,
) -> AuthResult<Json<Value>> {
    let token = bearer_token(&headers)?;
    let identity = app.identity.verify(token).await?;
    let mut session = app.bridge.sync(token, &identity, &current.client).await?;

    match app
        .sessions
        .security
        .check(&mut session, &current.client, Some(token))
        .await
    {
        Verdict::Valid => {}
        Verdict::Suspicious(reason) => {
            app.store.invalidate(&session.session_id).await?;
            return Err(AuthError::security_violation(reason));
        }
        Verdict::Expired(reason) => {
            app.store.invalidate(&session.session_id).await?;
            tracing::info!(
                user_id = %session.user_id,
                session = session.short_id(),
                %reason,
                "Token-bound session expired by security check"
            );
            return Err(AuthError::unauthorized(format!("Session ended ({reason})")));
        }
    }

    Ok(Json(json!({
        "user": identity,
        "session": session.short_id(),
        "expires_at": format_time(session.expires_at),
    })))
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AuthError::invalid_token("Authorization header is not valid ASCII"))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or_else(|| AuthError::invalid_token("expected a Bearer token"))?
        .trim();
    if token.is_empty() {
        return Err(AuthError::invalid_token("empty bearer token"));
    }
    Ok(token)
}

fn format_time(at: OffsetDateTime) -> String {
    at.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

fn malformed_request(detail: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": {
                "kind": "VALIDATION/malformed_request",
                "category": "validation",
                "message": format!("Malformed request body: {detail}"),
                "advice": "Send a JSON object such as {\"remember_me\": true}.",
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            bearer_token(&headers),
            Err(AuthError::Unauthorized { .. })
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            bearer_token(&headers),
            Err(AuthError::InvalidToken { .. })
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-123"));
        assert_eq!(bearer_token(&headers).unwrap(), "tok-123");
    }

    #[test]
    fn test_session_view_hides_full_id() {
        let now = OffsetDateTime::now_utc();
        let session = Session {
            session_id: "abcdefghijklmnopqrstuvwxyz".into(),
            user_id: "u1".into(),
            created_at: now,
            last_accessed: now,
            expires_at: now + time::Duration::hours(8),
            ip_address: "1.2.3.4".into(),
            user_agent: "Chrome".into(),
            is_active: true,
            remember_me: false,
            data: Default::default(),
            token_id: None,
            last_sso_check: None,
        };

        let view = SessionView::new(&session, Some("abcdefghijklmnopqrstuvwxyz"));
        assert_eq!(view.id, "abcdefgh");
        assert!(view.current);
        assert!(!SessionView::new(&session, None).current);
    }
}
