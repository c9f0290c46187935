use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use gatekeep_auth::sso::hash_token;
use gatekeep_auth::{InMemorySessionStorage, system_clock};
use gatekeep_server::{AppConfig, AppState, build_app};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header as match_header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";

fn config_for(idp: &MockServer) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.idp.base_url = idp.uri();
    cfg.auth.idp.allow_http = true;
    cfg.auth.cookie.encryption_key = KEY.to_string();
    cfg.auth.breaker.failure_threshold = 2;
    cfg.validate().expect("valid test config");
    cfg
}

fn app_for(cfg: &AppConfig) -> (Router, AppState) {
    let state = AppState::from_config(cfg, Arc::new(InMemorySessionStorage::new()), system_clock())
        .expect("state");
    (build_app(state.clone()), state)
}

async fn mock_userinfo(idp: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(match_header("authorization", "Bearer opaque-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "u1",
            "email": "u1@example.com",
            "groups": ["staff"]
        })))
        .mount(idp)
        .await;
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.expect("response")
}

async fn body_json(res: Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn set_cookie(res: &Response) -> String {
    res.headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .unwrap()
        .to_string()
}

/// `name=value` part of a `Set-Cookie` header.
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn login_request(token: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn login_session_lifecycle() {
    let idp = MockServer::start().await;
    mock_userinfo(&idp).await;
    let cfg = config_for(&idp);
    let (app, state) = app_for(&cfg);

    // anonymous
    let res = send(
        &app,
        Request::builder().uri("/auth/me").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // login issues a cookie
    let res = send(&app, login_request("opaque-token", r#"{"remember_me": false}"#)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let issued = set_cookie(&res);
    assert!(issued.starts_with("gk_session="));
    assert!(issued.contains("HttpOnly"));
    let cookie = cookie_pair(&issued);
    let body = body_json(res).await;
    assert_eq!(body["user"]["sub"], "u1");

    // the cookie resolves to the session
    let res = send(&app, get_with_cookie("/auth/me", &cookie)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["data"]["email"], "u1@example.com");

    let res = send(&app, get_with_cookie("/auth/sessions", &cookie)).await;
    let sessions = body_json(res).await;
    assert_eq!(sessions.as_array().map(Vec::len), Some(1));
    assert_eq!(sessions[0]["current"], true);
    assert_eq!(sessions[0]["id"].as_str().map(str::len), Some(8));

    // rotation retires the old cookie
    let res = send(&app, post_with_cookie("/auth/rotate", &cookie)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let rotated = cookie_pair(&set_cookie(&res));
    assert_ne!(rotated, cookie);

    let res = send(&app, get_with_cookie("/auth/me", &cookie)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&res).contains("Max-Age=0"));

    let res = send(&app, get_with_cookie("/auth/me", &rotated)).await;
    assert_eq!(res.status(), StatusCode::OK);

    // logout clears the cookie and ends the session
    let res = send(&app, post_with_cookie("/auth/logout", &rotated)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(set_cookie(&res).contains("Max-Age=0"));
    assert_eq!(body_json(res).await["logged_out"], true);

    let res = send(&app, get_with_cookie("/auth/me", &rotated)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(state.store.list("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn logout_all_ends_every_session() {
    let idp = MockServer::start().await;
    mock_userinfo(&idp).await;
    let (app, state) = app_for(&config_for(&idp));

    let first = cookie_pair(&set_cookie(&send(&app, login_request("opaque-token", "")).await));
    let _second = send(&app, login_request("opaque-token", "")).await;
    assert_eq!(state.store.list("u1").await.unwrap().len(), 2);

    let res = send(&app, post_with_cookie("/auth/logout-all", &first)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["sessions_ended"], 2);
    assert!(state.store.list("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_login_body_is_rejected() {
    let idp = MockServer::start().await;
    mock_userinfo(&idp).await;
    let (app, _) = app_for(&config_for(&idp));

    let res = send(&app, login_request("opaque-token", "{not json")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(res).await["error"]["kind"],
        "VALIDATION/malformed_request"
    );
}

#[tokio::test]
async fn unreachable_provider_opens_the_breaker() {
    let idp = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&idp)
        .await;
    let (app, _) = app_for(&config_for(&idp));

    for _ in 0..2 {
        let res = send(&app, login_request("opaque-token", "")).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    // threshold reached: fails fast without calling the provider
    let res = send(&app, login_request("opaque-token", "")).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(res.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(
        body_json(res).await["error"]["kind"],
        "CONNECTIVITY/circuit_open"
    );

    let res = send(
        &app,
        Request::builder().uri("/healthz").body(Body::empty()).unwrap(),
    )
    .await;
    let health = body_json(res).await;
    assert_eq!(health["breakers"][0]["name"], "identity_provider");
    assert_eq!(health["breakers"][0]["state"], "open");
}

#[tokio::test]
async fn bearer_token_resolves_to_one_bound_session() {
    let idp = MockServer::start().await;
    let exp = time::OffsetDateTime::now_utc().unix_timestamp() + 3600;
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &json!({ "sub": "u1", "jti": "tok-1", "exp": exp }),
        &jsonwebtoken::EncodingKey::from_secret(b"idp-secret"),
    )
    .unwrap();
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sub": "u1" })))
        .mount(&idp)
        .await;
    let (app, state) = app_for(&config_for(&idp));

    let whoami = || {
        Request::builder()
            .uri("/api/whoami")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };

    let first = body_json(send(&app, whoami()).await).await;
    let second = body_json(send(&app, whoami()).await).await;
    assert_eq!(first["user"]["sub"], "u1");
    assert_eq!(first["session"], second["session"]);

    let sessions = state.store.list("u1").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].token_id.as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn bearer_session_is_revalidated_with_token_hash() {
    let idp = MockServer::start().await;
    let sso = MockServer::start().await;
    let exp = time::OffsetDateTime::now_utc().unix_timestamp() + 3600;
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &json!({ "sub": "u1", "jti": "tok-2", "exp": exp }),
        &jsonwebtoken::EncodingKey::from_secret(b"idp-secret"),
    )
    .unwrap();
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sub": "u1" })))
        .mount(&idp)
        .await;
    // only answers when the request carries the token's hash
    Mock::given(method("POST"))
        .and(path("/session/validate"))
        .and(body_partial_json(json!({
            "user_id": "u1",
            "token_hash": hash_token(&token),
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": false })))
        .expect(1)
        .mount(&sso)
        .await;

    let mut cfg = config_for(&idp);
    cfg.auth.sso.enabled = true;
    cfg.auth.sso.base_url = sso.uri();
    cfg.validate().expect("valid sso config");
    let (app, state) = app_for(&cfg);

    let res = send(
        &app,
        Request::builder()
            .uri("/api/whoami")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(state.store.list("u1").await.unwrap().is_empty());
}
