//! Trace query endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::api::extractors::{ScopePath, TracePath, ValidatedQuery, is_valid_id};
use crate::api::types::ApiError;
use crate::core::constants::MAX_SPAN_LIMIT;
use crate::domain::query::{
    QueryEngine, TraceQuery, TraceQueryConditions, TraceSpans, TraceSummary,
};

#[derive(Clone)]
pub struct TraceApiState {
    pub query: Arc<QueryEngine>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SpansQuery {
    /// Maximum spans returned; larger values are clamped
    #[validate(range(min = 1, message = "limit must be positive"))]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: i64,
}

/// Routes nested under `/api/v1/scopes/{scope_id}/traces`
pub fn scoped_routes(state: TraceApiState) -> Router<()> {
    Router::new()
        .route("/", get(list_traces))
        .route("/count", get(count_traces))
        .route("/conditions", get(query_conditions))
        .route("/{trace_id}/spans", get(trace_spans))
        .with_state(state)
}

/// Routes nested under `/api/v1/traces`
pub fn routes(state: TraceApiState) -> Router<()> {
    Router::new()
        .route("/{trace_id}/span-count", get(span_count))
        .with_state(state)
}

fn scoped(path: ScopePath, mut query: TraceQuery) -> TraceQuery {
    query.scope_id = path.scope_id;
    query
}

/// Search traces in a scope
#[utoipa::path(
    get,
    path = "/api/v1/scopes/{scope_id}/traces",
    tag = "traces",
    params(
        ("scope_id" = String, Path, description = "Scope (terminus key)"),
        ("start_time" = Option<i64>, Query, description = "Window start, unix ms (default: one hour ago)"),
        ("end_time" = Option<i64>, Query, description = "Window end, unix ms (default: now)"),
        ("trace_id" = Option<String>, Query, description = "Exact trace id"),
        ("service_name" = Option<String>, Query, description = "Service name"),
        ("rpc_method" = Option<String>, Query, description = "RPC method"),
        ("http_path" = Option<String>, Query, description = "HTTP path"),
        ("duration_min" = Option<i64>, Query, description = "Minimum duration, ns"),
        ("duration_max" = Option<i64>, Query, description = "Maximum duration, ns"),
        ("status" = Option<String>, Query, description = "all, success or error"),
        ("sort" = Option<String>, Query, description = "Result ordering"),
        ("limit" = Option<i64>, Query, description = "Maximum traces (default 100, max 1000)")
    ),
    responses(
        (status = 200, description = "Matching traces", body = Vec<TraceSummary>),
        (status = 400, description = "Invalid filter"),
        (status = 503, description = "Metrics store not configured")
    )
)]
pub async fn list_traces(
    State(state): State<TraceApiState>,
    path: ScopePath,
    Query(query): Query<TraceQuery>,
) -> Result<Json<Vec<TraceSummary>>, ApiError> {
    let traces = state.query.get_traces(scoped(path, query)).await?;
    Ok(Json(traces))
}

/// Count traces matching a search
#[utoipa::path(
    get,
    path = "/api/v1/scopes/{scope_id}/traces/count",
    tag = "traces",
    params(("scope_id" = String, Path, description = "Scope (terminus key)")),
    responses(
        (status = 200, description = "Matching trace count", body = CountResponse),
        (status = 400, description = "Invalid filter")
    )
)]
pub async fn count_traces(
    State(state): State<TraceApiState>,
    path: ScopePath,
    Query(query): Query<TraceQuery>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.query.get_traces_count(scoped(path, query)).await?;
    Ok(Json(CountResponse { count }))
}

/// Filter and sort options for trace search
#[utoipa::path(
    get,
    path = "/api/v1/scopes/{scope_id}/traces/conditions",
    tag = "traces",
    params(("scope_id" = String, Path, description = "Scope (terminus key)")),
    responses((status = 200, description = "Search options", body = TraceQueryConditions))
)]
pub async fn query_conditions(
    State(state): State<TraceApiState>,
    _path: ScopePath,
) -> Json<TraceQueryConditions> {
    Json(state.query.trace_query_conditions())
}

/// Spans of one trace with derived depth and durations
#[utoipa::path(
    get,
    path = "/api/v1/scopes/{scope_id}/traces/{trace_id}/spans",
    tag = "spans",
    params(
        ("scope_id" = String, Path, description = "Scope (terminus key)"),
        ("trace_id" = String, Path, description = "Trace ID"),
        ("limit" = Option<i64>, Query, description = "Maximum spans (max 10000)")
    ),
    responses(
        (status = 200, description = "Trace spans", body = TraceSpans),
        (status = 400, description = "Invalid parameters")
    )
)]
pub async fn trace_spans(
    State(state): State<TraceApiState>,
    path: TracePath,
    ValidatedQuery(query): ValidatedQuery<SpansQuery>,
) -> Result<Json<TraceSpans>, ApiError> {
    let limit = query.limit.unwrap_or(MAX_SPAN_LIMIT);
    let spans = state
        .query
        .get_spans(&path.trace_id, &path.scope_id, limit)
        .await?;
    Ok(Json(spans))
}

/// Number of stored spans for a trace across every backend
#[utoipa::path(
    get,
    path = "/api/v1/traces/{trace_id}/span-count",
    tag = "spans",
    params(("trace_id" = String, Path, description = "Trace ID")),
    responses(
        (status = 200, description = "Span count", body = CountResponse),
        (status = 400, description = "Invalid trace id")
    )
)]
pub async fn span_count(
    State(state): State<TraceApiState>,
    Path(trace_id): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    if !is_valid_id(&trace_id) {
        return Err(ApiError::bad_request("INVALID_TRACE_ID", "Invalid trace_id"));
    }
    let count = state.query.get_span_count(&trace_id).await;
    Ok(Json(CountResponse { count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemorySpanStorage, SpanStorage};
    use crate::domain::query::DisabledMetricQuery;
    use crate::domain::span::Span;

    async fn state_with(spans: Vec<Span>) -> TraceApiState {
        let storage = MemorySpanStorage::new();
        let mut writer = storage.new_writer().await.unwrap();
        for span in spans {
            writer.write(span).await.unwrap();
        }
        writer.flush().await.unwrap();
        let backends: Vec<Arc<dyn SpanStorage>> = vec![Arc::new(storage)];
        TraceApiState {
            query: Arc::new(QueryEngine::new(backends, Arc::new(DisabledMetricQuery))),
        }
    }

    fn span(span_id: &str, parent: &str, start: i64, end: i64) -> Span {
        Span {
            trace_id: "t1".into(),
            span_id: span_id.into(),
            parent_span_id: parent.into(),
            start_time: start,
            end_time: end,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_trace_spans_handler() {
        let state = state_with(vec![span("a", "", 0, 100), span("b", "a", 10, 40)]).await;
        let path = TracePath {
            scope_id: "tk".into(),
            trace_id: "t1".into(),
        };
        let Json(spans) = trace_spans(
            State(state),
            path,
            ValidatedQuery(SpansQuery { limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(spans.span_count, 2);
        assert_eq!(spans.depth, 2);
    }

    #[tokio::test]
    async fn test_span_count_handler() {
        let state = state_with(vec![span("a", "", 0, 100)]).await;
        let Json(count) = span_count(State(state.clone()), Path("t1".into()))
            .await
            .unwrap();
        assert_eq!(count.count, 1);

        let invalid = span_count(State(state), Path(String::new())).await;
        assert!(matches!(invalid, Err(ApiError::BadRequest { .. })));
    }

    #[tokio::test]
    async fn test_search_without_metrics_store_is_unavailable() {
        let state = state_with(vec![]).await;
        let result = list_traces(
            State(state),
            ScopePath {
                scope_id: "tk".into(),
            },
            Query(TraceQuery::default()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::ServiceUnavailable { .. })));
    }
}
