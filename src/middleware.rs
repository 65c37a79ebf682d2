use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::handlers::SharedState;
use crate::pagination::request_origin;
use crate::response_cache::cache_key;
use crate::throttle::ThrottleDecision;

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = state
        .identity
        .client_address(request.headers(), peer_addr(&request));

    info!(
        target: "periodic_api::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "periodic_api::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Rejects requests over quota before they reach the cache or the handlers.
pub async fn throttle_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let client = state.identity.resolve(request.headers(), peer_addr(&request));

    let decision = state.throttle.check(&client);
    if let ThrottleDecision::Denied { .. } = decision {
        let retry_after = decision.retry_after_secs();
        warn!(
            target: "periodic_api::middleware",
            client = client.kind(),
            uri = %request.uri(),
            retry_after,
            "Request throttled"
        );
        return ApiError::Throttled { retry_after }.into_response();
    }

    next.run(request).await
}

/// Serves fresh cached responses and stores successful GET responses.
pub async fn cache_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let origin = request_origin(
        request.headers(),
        request.uri(),
        state.identity.trusts_forwarded_headers(),
    );
    let key = cache_key(origin.as_deref(), request.uri());
    if let Some(cached) = state.cache.get(&key) {
        debug!(target: "periodic_api::middleware", key = %key, "Cache hit");
        return cached;
    }

    // Concurrent misses on one key wait for the first to store its response.
    let _fill = state.cache.fill_guard(&key).await;
    if let Some(cached) = state.cache.get(&key) {
        debug!(target: "periodic_api::middleware", key = %key, "Cache hit after fill");
        return cached;
    }

    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => return ApiError::Internal(err.to_string()).into_response(),
    };

    parts
        .headers
        .insert(header::CACHE_CONTROL, state.cache.cache_control());
    state
        .cache
        .insert(key.clone(), parts.status, parts.headers.clone(), bytes.clone());
    debug!(target: "periodic_api::middleware", key = %key, "Cache store");

    Response::from_parts(parts, Body::from(bytes))
}
