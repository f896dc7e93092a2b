//! HTTP middleware (CORS, request tracing, 404 handler)

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::{Method, StatusCode, header};
use axum::response::IntoResponse;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// CORS layer for browser clients of the query and debug APIs
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
}

/// Per-request spans at debug level
pub fn trace() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
}

const MAX_404_BODY_LOG: usize = 64 * 1024;

/// Handle 404 Not Found with logging
pub async fn handle_404(req: Request) -> impl IntoResponse {
    if !tracing::enabled!(Level::DEBUG) {
        return StatusCode::NOT_FOUND;
    }

    let method = req.method().clone();
    let uri = req.uri().clone();

    match to_bytes(req.into_body(), MAX_404_BODY_LOG).await {
        Ok(body) => tracing::debug!(
            method = %method,
            uri = %uri,
            body_len = body.len(),
            body = %String::from_utf8_lossy(&body),
            "Route not found"
        ),
        Err(_) => tracing::debug!(method = %method, uri = %uri, "Route not found (body unreadable)"),
    }

    StatusCode::NOT_FOUND
}
