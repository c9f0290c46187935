//! Handler extractors for the cookie session.
//!
//! Both require [`session_middleware`](super::session_middleware) to be
//! installed on the route.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::session::SessionHandle;
use crate::error::AuthError;
use crate::session::{ClientInfo, Session};

/// The request's session state, present or not.
///
/// # Example
///
/// ```ignore
/// async fn login(current: CurrentSession, State(app): State<AppState>) -> impl IntoResponse {
///     let session = app.store.create(&user_id, &current.client, false).await?;
///     current.handle.establish(session);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentSession {
    /// The validated session, `None` for anonymous requests.
    pub session: Option<Session>,
    /// Handle for establishing or ending the session.
    pub handle: SessionHandle,
    /// IP address and User-Agent of the request.
    pub client: ClientInfo,
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let handle = parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .ok_or_else(|| AuthError::internal("session middleware is not installed"))?;
        let client = parts
            .extensions
            .get::<ClientInfo>()
            .cloned()
            .ok_or_else(|| AuthError::internal("session middleware is not installed"))?;

        Ok(Self {
            session: handle.current(),
            handle,
            client,
        })
    }
}

/// Extractor that rejects anonymous requests with 401.
///
/// ```ignore
/// async fn me(RequireSession(session): RequireSession) -> String {
///     session.user_id
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireSession(pub Session);

impl<S> FromRequestParts<S> for RequireSession
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let current = CurrentSession::from_request_parts(parts, state).await?;
        current
            .session
            .map(RequireSession)
            .ok_or_else(|| AuthError::unauthorized("Authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_missing_middleware_is_an_internal_error() {
        let (mut parts, ()) = Request::builder().uri("/").body(()).unwrap().into_parts();
        let err = CurrentSession::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal { .. }));
    }
}
