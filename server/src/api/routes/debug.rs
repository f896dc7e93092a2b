//! Debug request endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::api::extractors::{DebugPath, ScopePath, ValidatedJson, ValidatedQuery};
use crate::api::types::ApiError;
use crate::core::constants::MAX_HISTORY_LIMIT;
use crate::domain::debug::{
    CreateDebugRequest, DebugHistories, DebugHistory, DebugService, DebugStatusInfo,
};

#[derive(Clone)]
pub struct DebugApiState {
    pub debug: Arc<DebugService>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct HistoryQuery {
    #[validate(range(min = 1, max = MAX_HISTORY_LIMIT, message = "limit out of range"))]
    pub limit: Option<i64>,
}

/// Routes nested under `/api/v1/scopes/{scope_id}/debug`
pub fn routes(state: DebugApiState) -> Router<()> {
    Router::new()
        .route("/", post(create_debug_request).get(list_histories))
        .route("/{request_id}", get(get_history))
        .route("/{request_id}/status", get(get_status))
        .route("/{request_id}/stop", post(stop_debug_request))
        .with_state(state)
}

/// Send a debug request tagged for trace correlation
#[utoipa::path(
    post,
    path = "/api/v1/scopes/{scope_id}/debug",
    tag = "debug",
    params(("scope_id" = String, Path, description = "Scope (terminus key)")),
    request_body = CreateDebugRequest,
    responses(
        (status = 201, description = "Request recorded and sent", body = DebugStatusInfo),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn create_debug_request(
    State(state): State<DebugApiState>,
    path: ScopePath,
    ValidatedJson(req): ValidatedJson<CreateDebugRequest>,
) -> Result<(StatusCode, Json<DebugStatusInfo>), ApiError> {
    let info = state.debug.create(&path.scope_id, req).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// Recent debug requests, newest first
#[utoipa::path(
    get,
    path = "/api/v1/scopes/{scope_id}/debug",
    tag = "debug",
    params(
        ("scope_id" = String, Path, description = "Scope (terminus key)"),
        ("limit" = Option<i64>, Query, description = "Maximum entries (default 20, max 200)")
    ),
    responses((status = 200, description = "Debug request history", body = DebugHistories))
)]
pub async fn list_histories(
    State(state): State<DebugApiState>,
    path: ScopePath,
    ValidatedQuery(query): ValidatedQuery<HistoryQuery>,
) -> Result<Json<DebugHistories>, ApiError> {
    let histories = state.debug.histories(&path.scope_id, query.limit).await?;
    Ok(Json(histories))
}

/// One debug request with its response
#[utoipa::path(
    get,
    path = "/api/v1/scopes/{scope_id}/debug/{request_id}",
    tag = "debug",
    params(
        ("scope_id" = String, Path, description = "Scope (terminus key)"),
        ("request_id" = String, Path, description = "Debug request ID")
    ),
    responses(
        (status = 200, description = "Debug request", body = DebugHistory),
        (status = 404, description = "Unknown request")
    )
)]
pub async fn get_history(
    State(state): State<DebugApiState>,
    path: DebugPath,
) -> Result<Json<DebugHistory>, ApiError> {
    let history = state
        .debug
        .history(&path.scope_id, &path.request_id)
        .await?;
    Ok(Json(history))
}

/// Poll whether spans for the request have arrived
#[utoipa::path(
    get,
    path = "/api/v1/scopes/{scope_id}/debug/{request_id}/status",
    tag = "debug",
    params(
        ("scope_id" = String, Path, description = "Scope (terminus key)"),
        ("request_id" = String, Path, description = "Debug request ID")
    ),
    responses(
        (status = 200, description = "Current status", body = DebugStatusInfo),
        (status = 404, description = "Unknown request")
    )
)]
pub async fn get_status(
    State(state): State<DebugApiState>,
    path: DebugPath,
) -> Result<Json<DebugStatusInfo>, ApiError> {
    let info = state
        .debug
        .status(&path.scope_id, &path.request_id)
        .await?;
    Ok(Json(info))
}

/// Stop waiting for spans
#[utoipa::path(
    post,
    path = "/api/v1/scopes/{scope_id}/debug/{request_id}/stop",
    tag = "debug",
    params(
        ("scope_id" = String, Path, description = "Scope (terminus key)"),
        ("request_id" = String, Path, description = "Debug request ID")
    ),
    responses(
        (status = 200, description = "Request stopped", body = DebugStatusInfo),
        (status = 404, description = "Unknown request")
    )
)]
pub async fn stop_debug_request(
    State(state): State<DebugApiState>,
    path: DebugPath,
) -> Result<Json<DebugStatusInfo>, ApiError> {
    let info = state.debug.stop(&path.scope_id, &path.request_id).await?;
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DebugConfig;
    use crate::data::sqlite::SqliteService;
    use crate::data::{MemorySpanStorage, SpanStorage};
    use crate::domain::debug::DebugStatus;
    use crate::domain::query::{DisabledMetricQuery, QueryEngine};

    async fn state() -> DebugApiState {
        let sqlite = SqliteService::in_memory().await.unwrap();
        let backends: Vec<Arc<dyn SpanStorage>> = vec![Arc::new(MemorySpanStorage::new())];
        let query = Arc::new(QueryEngine::new(backends, Arc::new(DisabledMetricQuery)));
        let debug = DebugService::new(
            sqlite.pool().clone(),
            query,
            &DebugConfig {
                http_timeout_secs: 1,
            },
        )
        .unwrap();
        DebugApiState {
            debug: Arc::new(debug),
        }
    }

    fn debug_path(request_id: &str) -> DebugPath {
        DebugPath {
            scope_id: "tk".into(),
            request_id: request_id.into(),
        }
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let state = state().await;
        let result = get_status(State(state.clone()), debug_path("missing")).await;
        assert!(matches!(result, Err(ApiError::NotFound { .. })));
        let result = stop_debug_request(State(state), debug_path("missing")).await;
        assert!(matches!(result, Err(ApiError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_create_then_stop() {
        let state = state().await;
        // Nothing listens on port 9 of the loopback; the send fails and is recorded
        let req = CreateDebugRequest {
            url: "http://127.0.0.1:9/api".into(),
            method: "GET".into(),
            ..Default::default()
        };
        let (status, Json(info)) = create_debug_request(
            State(state.clone()),
            ScopePath {
                scope_id: "tk".into(),
            },
            ValidatedJson(req),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(info.status, DebugStatus::Init);

        let Json(stopped) = stop_debug_request(State(state.clone()), debug_path(&info.request_id))
            .await
            .unwrap();
        assert_eq!(stopped.status, DebugStatus::Stop);

        let Json(histories) = list_histories(
            State(state),
            ScopePath {
                scope_id: "tk".into(),
            },
            ValidatedQuery(HistoryQuery { limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(histories.total, 1);
        assert_eq!(histories.histories[0].response_status, 0);
    }
}
