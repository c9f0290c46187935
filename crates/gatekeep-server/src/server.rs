use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use gatekeep_auth::{
    AuthResult, BreakerRegistry, IdentityClient, JwtSessionBridge, NoBlacklist, SecurityPolicy,
    SecurityValidator, SessionCookies, SessionState, SessionStorage, SessionStore, SharedClock,
    SsoValidator, session_middleware,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::{config::AppConfig, routes, sweeper::spawn_sweeper};

/// Name of the breaker guarding the identity provider.
pub const IDENTITY_BREAKER: &str = "identity_provider";

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionState,
    pub store: Arc<SessionStore>,
    pub identity: Arc<IdentityClient>,
    pub bridge: Arc<JwtSessionBridge>,
    pub breakers: Arc<BreakerRegistry>,
    pub sso: Arc<SsoValidator>,
}

impl AppState {
    /// Wires the authentication components over `storage`.
    pub fn from_config(
        cfg: &AppConfig,
        storage: Arc<dyn SessionStorage>,
        clock: SharedClock,
    ) -> AuthResult<Self> {
        let auth = &cfg.auth;

        let breakers = Arc::new(BreakerRegistry::new(auth.breaker.clone(), Arc::clone(&clock)));
        let identity = Arc::new(IdentityClient::new(
            &auth.idp,
            breakers.get_or_create(IDENTITY_BREAKER),
            Arc::new(NoBlacklist),
        )?);

        let store = Arc::new(SessionStore::new(
            storage,
            auth.session.clone(),
            Arc::clone(&clock),
        ));
        let sso = Arc::new(SsoValidator::from_config(&auth.sso, Arc::clone(&clock))?);
        let security = Arc::new(SecurityValidator::new(
            SecurityPolicy::from_config(auth),
            Arc::clone(&sso),
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let cookies = Arc::new(SessionCookies::from_config(&auth.cookie)?);
        let bridge = Arc::new(JwtSessionBridge::new(Arc::clone(&store), Arc::clone(&clock)));

        let sessions = SessionState::new(
            Arc::clone(&store),
            security,
            cookies,
            auth.middleware.clone(),
            clock,
        );

        Ok(Self {
            sessions,
            store,
            identity,
            bridge,
            breakers,
            sso,
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/auth/login", post(routes::login))
        .route("/auth/logout", post(routes::logout))
        .route("/auth/logout-all", post(routes::logout_all))
        .route("/auth/sessions", get(routes::list_sessions))
        .route("/auth/me", get(routes::me))
        .route("/auth/rotate", post(routes::rotate))
        .route("/api/whoami", get(routes::whoami))
        .layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            session_middleware,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .with_state(state)
}

pub struct GatekeepServer {
    addr: SocketAddr,
    state: AppState,
    cleanup_interval: std::time::Duration,
}

impl GatekeepServer {
    pub fn new(cfg: &AppConfig, state: AppState) -> Self {
        Self {
            addr: cfg.addr(),
            state,
            cleanup_interval: cfg.auth.session.cleanup_interval,
        }
    }

    /// Serves until Ctrl+C, then stops the sweeper and waits for pending
    /// session writes.
    pub async fn run(self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(
            Arc::clone(&self.state.store),
            Arc::clone(&self.state.sso),
            self.cleanup_interval,
            cancel.clone(),
        );

        let store = Arc::clone(&self.state.store);
        let app = build_app(self.state);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        cancel.cancel();
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Session sweeper panicked");
        }
        store.shutdown().await;
        tracing::info!("pending session writes flushed");

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
