//! Prometheus scrape endpoint

use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};

use crate::api::types::ApiError;
use crate::domain::ingest::IngestMetrics;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Ingest pipeline metrics in the Prometheus text format
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "metrics",
    responses((status = 200, description = "Prometheus text exposition", body = String))
)]
pub async fn metrics(State(metrics): State<IngestMetrics>) -> Result<Response, ApiError> {
    let body = metrics.render().map_err(|e| {
        tracing::error!(error = %e, "Failed to encode metrics");
        ApiError::internal("Failed to encode metrics")
    })?;
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
    Ok(response)
}
