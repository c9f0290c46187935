//! Session middleware.
//!
//! Around every non-exempt request:
//!
//! 1. decrypt the session cookie and load the session
//! 2. run the security check, with the request's bearer token (if any)
//!    forwarded to SSO revalidation
//! 3. expose the session to handlers through a [`SessionHandle`]
//! 4. after the handler, issue, refresh or clear the cookie according to
//!    what happened to the handle
//!
//! A suspicious session is invalidated and the request is rejected with 401
//! before the handler runs. An expired one is invalidated and the request
//! continues anonymously.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;

use super::client::{bearer_token, client_info};
use crate::clock::SharedClock;
use crate::config::MiddlewareConfig;
use crate::error::AuthError;
use crate::security::{SecurityValidator, Verdict};
use crate::session::{CookieRead, Session, SessionCookies, SessionStore};

/// State for [`session_middleware`].
#[derive(Clone)]
pub struct SessionState {
    pub store: Arc<SessionStore>,
    pub security: Arc<SecurityValidator>,
    pub cookies: Arc<SessionCookies>,
    pub config: Arc<MiddlewareConfig>,
    pub clock: SharedClock,
}

impl SessionState {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        security: Arc<SecurityValidator>,
        cookies: Arc<SessionCookies>,
        config: MiddlewareConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            security,
            cookies,
            config: Arc::new(config),
            clock,
        }
    }
}

/// What the response must do with the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CookieAction {
    Keep,
    Issue,
    Clear,
}

#[derive(Debug)]
struct HandleState {
    current: Option<Session>,
    action: CookieAction,
}

/// The request's session, shared between the middleware and the handler.
///
/// Handlers call [`establish`](Self::establish) after login or regeneration
/// and [`end`](Self::end) after logout; the middleware turns that into a
/// `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<HandleState>>,
}

impl SessionHandle {
    fn new(current: Option<Session>, action: CookieAction) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandleState { current, action })),
        }
    }

    /// The session attached to this request, if any.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.inner.lock().current.clone()
    }

    /// Attaches `session` to the response; its cookie will be issued.
    pub fn establish(&self, session: Session) {
        let mut state = self.inner.lock();
        state.current = Some(session);
        state.action = CookieAction::Issue;
    }

    /// Detaches the session; the cookie will be cleared.
    pub fn end(&self) {
        let mut state = self.inner.lock();
        state.current = None;
        state.action = CookieAction::Clear;
    }

    fn finish(&self) -> (Option<Session>, CookieAction) {
        let state = self.inner.lock();
        (state.current.clone(), state.action)
    }
}

/// Axum middleware maintaining the cookie session.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn session_middleware(
    State(state): State<SessionState>,
    mut req: Request,
    next: Next,
) -> Response {
    if state.config.is_exempt(req.uri().path()) {
        return next.run(req).await;
    }

    let client = client_info(
        req.headers(),
        req.extensions(),
        state.config.trust_forwarded_headers,
    );
    // hashed into the SSO revalidation request
    let token = bearer_token(req.headers()).map(str::to_owned);

    let (session, action) = match state.cookies.read(req.headers()) {
        CookieRead::Absent => (None, CookieAction::Keep),
        CookieRead::Invalid => {
            tracing::debug!("Undecryptable session cookie ignored");
            (None, CookieAction::Clear)
        }
        CookieRead::Session(session_id) => match state.store.load(&session_id).await {
            Ok((mut session, renewed)) => {
                match state
                    .security
                    .check(&mut session, &client, token.as_deref())
                    .await
                {
                    Verdict::Valid => {
                        let action = if renewed {
                            CookieAction::Issue
                        } else {
                            CookieAction::Keep
                        };
                        (Some(session), action)
                    }
                    Verdict::Suspicious(reason) => {
                        end_session(&state, &session).await;
                        let mut response = AuthError::security_violation(reason).into_response();
                        apply_cookie(&state, &mut response, None, CookieAction::Clear);
                        return response;
                    }
                    Verdict::Expired(reason) => {
                        tracing::info!(
                            user_id = %session.user_id,
                            session = session.short_id(),
                            %reason,
                            "Session expired by security check"
                        );
                        end_session(&state, &session).await;
                        (None, CookieAction::Clear)
                    }
                }
            }
            Err(AuthError::SessionNotFound) => (None, CookieAction::Clear),
            Err(e) => return e.into_response(),
        },
    };

    let handle = SessionHandle::new(session, action);
    req.extensions_mut().insert(handle.clone());
    req.extensions_mut().insert(client);

    let mut response = next.run(req).await;

    let (current, action) = handle.finish();
    apply_cookie(&state, &mut response, current.as_ref(), action);
    response
}

async fn end_session(state: &SessionState, session: &Session) {
    if let Err(e) = state.store.invalidate(&session.session_id).await {
        tracing::error!(session = session.short_id(), error = %e, "Failed to invalidate session");
    }
}

fn apply_cookie(
    state: &SessionState,
    response: &mut Response,
    session: Option<&Session>,
    action: CookieAction,
) {
    let header = match (action, session) {
        (CookieAction::Keep, _) => return,
        (CookieAction::Issue, Some(session)) => state.cookies.issue(session, state.clock.now()),
        (CookieAction::Issue, None) | (CookieAction::Clear, _) => state.cookies.clear(),
    };
    match header {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "Failed to build session cookie"),
    }
}
