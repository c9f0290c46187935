//! HTTP middleware for cookie sessions.
//!
//! This module provides:
//!
//! - [`session_middleware`] - loads, validates and persists the session
//!   around every request
//! - [`CurrentSession`] / [`RequireSession`] - extractors for handlers
//! - `IntoResponse` for [`AuthError`](crate::AuthError)
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use gatekeep_auth::middleware::{RequireSession, SessionState, session_middleware};
//!
//! async fn me(RequireSession(session): RequireSession) -> String {
//!     session.user_id
//! }
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(from_fn_with_state(session_state, session_middleware));
//! ```

pub mod client;
pub mod error;
pub mod extract;
pub mod session;

pub use client::{UNKNOWN_CLIENT, bearer_token, client_info};
pub use error::error_body;
pub use extract::{CurrentSession, RequireSession};
pub use session::{SessionHandle, SessionState, session_middleware};
