pub mod auth;
pub mod cache;
pub mod rate_limit;
pub mod response;
pub mod session;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{request::Parts, Extensions, HeaderMap},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

pub use auth::{admin_auth_middleware, AuthAdmin};
pub use cache::cache_control_middleware;
pub use rate_limit::rate_limit_middleware;
pub use response::{ApiResponse, ApiResult};
pub use session::session_middleware;

/// Client address: first `X-Forwarded-For` hop, else the socket peer
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    resolve_ip(request.headers(), request.extensions())
}

fn resolve_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
}

/// Extractor form of [`client_ip`] for handlers that also take a body
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl ClientIp {
    pub fn label(&self) -> Option<String> {
        self.0.map(|ip| ip.to_string())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(resolve_ip(&parts.headers, &parts.extensions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn prefers_first_forwarded_hop() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), Some("203.0.113.5".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_connect_info() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "not-an-ip")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), None);

        let addr: SocketAddr = "198.51.100.7:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&request), Some(addr.ip()));
    }
}
