//! OpenAPI specification and Swagger UI

use axum::http::header;
use axum::response::{Html, IntoResponse, Json};
use utoipa::OpenApi;

use crate::api::routes::{debug, health, ingest, metrics, traces};
use crate::api::types::ErrorBody;
use crate::domain::debug::{
    CreateDebugRequest, DebugHistories, DebugHistory, DebugStatus, DebugStatusInfo,
};
use crate::domain::ingest::ConsumerStatsSnapshot;
use crate::domain::query::{
    QueryCondition, SpanView, TraceQueryConditions, TraceSort, TraceSpans, TraceStatus,
    TraceSummary,
};
use crate::domain::span::Span;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tracehouse API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Distributed trace ingestion and query server"
    ),
    tags(
        (name = "health", description = "Health check endpoint"),
        (name = "metrics", description = "Prometheus metrics"),
        (name = "ingest", description = "Span record publishing"),
        (name = "traces", description = "Trace search"),
        (name = "spans", description = "Span queries"),
        (name = "debug", description = "Debug request replay")
    ),
    paths(
        health::health,
        metrics::metrics,
        // Ingest
        ingest::publish,
        ingest::ingest_stats,
        // Traces
        traces::list_traces,
        traces::count_traces,
        traces::query_conditions,
        traces::trace_spans,
        traces::span_count,
        // Debug
        debug::create_debug_request,
        debug::list_histories,
        debug::get_history,
        debug::get_status,
        debug::stop_debug_request,
    ),
    components(schemas(
        ErrorBody,
        health::HealthResponse,
        health::ComponentHealth,
        ingest::PublishResponse,
        ConsumerStatsSnapshot,
        traces::CountResponse,
        Span,
        SpanView,
        TraceSpans,
        TraceSummary,
        TraceStatus,
        TraceSort,
        QueryCondition,
        TraceQueryConditions,
        CreateDebugRequest,
        DebugStatus,
        DebugStatusInfo,
        DebugHistory,
        DebugHistories,
    ))
)]
pub struct ApiDoc;

/// Serve OpenAPI JSON specification
pub async fn openapi_json() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Json(ApiDoc::openapi()),
    )
}

/// Serve Swagger UI from CDN
pub async fn swagger_ui_html() -> Html<&'static str> {
    Html(SWAGGER_UI_HTML)
}

const SWAGGER_UI_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Tracehouse API</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = () => {
            window.ui = SwaggerUIBundle({ url: "/api/openapi.json", dom_id: '#swagger-ui' });
        };
    </script>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();
        let paths = json["paths"].as_object().unwrap();
        assert!(paths.contains_key("/api/v1/scopes/{scope_id}/traces/{trace_id}/spans"));
        assert!(paths.contains_key("/api/v1/scopes/{scope_id}/debug/{request_id}/stop"));
        assert!(paths.contains_key("/api/v1/ingest/{topic}"));
    }
}
