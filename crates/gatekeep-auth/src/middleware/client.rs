//! Request context extraction.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{
    Extensions, HeaderMap,
    header::{AUTHORIZATION, USER_AGENT},
};

use crate::session::ClientInfo;

/// Placeholder for an IP address or User-Agent that cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Builds the [`ClientInfo`] of a request.
///
/// The IP address comes from the socket (`ConnectInfo`). When
/// `trust_forwarded` is set, `X-Forwarded-For` (first hop) and then
/// `X-Real-IP` take precedence.
#[must_use]
pub fn client_info(headers: &HeaderMap, extensions: &Extensions, trust_forwarded: bool) -> ClientInfo {
    let forwarded = trust_forwarded.then(|| forwarded_ip(headers)).flatten();
    let ip_address = forwarded
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string();

    ClientInfo::new(ip_address, user_agent)
}

/// The token of an `Authorization: Bearer` header, if the request has one.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_socket_address_used_by_default() {
        let mut ext = Extensions::new();
        ext.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5555))));
        let h = headers(&[("x-forwarded-for", "9.9.9.9"), ("user-agent", "Chrome")]);

        let info = client_info(&h, &ext, false);
        assert_eq!(info, ClientInfo::new("10.0.0.7", "Chrome"));
    }

    #[test]
    fn test_forwarded_headers_when_trusted() {
        let mut ext = Extensions::new();
        ext.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5555))));

        let h = headers(&[("x-forwarded-for", "9.9.9.9, 10.0.0.1")]);
        assert_eq!(client_info(&h, &ext, true).ip_address, "9.9.9.9");

        let h = headers(&[("x-real-ip", "8.8.8.8")]);
        assert_eq!(client_info(&h, &ext, true).ip_address, "8.8.8.8");

        assert_eq!(client_info(&HeaderMap::new(), &ext, true).ip_address, "10.0.0.7");
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers(&[("authorization", "Bearer abc")])), Some("abc"));
        assert_eq!(bearer_token(&headers(&[("authorization", "bearer abc ")])), Some("abc"));
        assert_eq!(bearer_token(&headers(&[("authorization", "Basic abc")])), None);
        assert_eq!(bearer_token(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_unknown_when_nothing_available() {
        let info = client_info(&HeaderMap::new(), &Extensions::new(), false);
        assert_eq!(info, ClientInfo::new(UNKNOWN_CLIENT, UNKNOWN_CLIENT));
    }
}
