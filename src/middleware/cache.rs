use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::cache_policy::strategy_for;

/// Stamp `Cache-Control` from the cache rules unless the handler already set one
pub async fn cache_control_middleware(request: Request, next: Next) -> Response {
    let strategy = strategy_for(request.method(), request.uri().path());
    let mut response = next.run(request).await;

    if !response.headers().contains_key(header::CACHE_CONTROL) {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static(strategy.cache_control()));
    }
    response
}
