//! Debug request replay and status tracking
//!
//! A debug request is persisted first, then sent once with correlation
//! headers. Its status resolves when a span carrying the request id lands in
//! storage, or fails after the timeout window.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::error::DebugError;
use super::status::DebugStatus;
use crate::core::config::DebugConfig;
use crate::core::constants::{
    DEFAULT_DEBUG_NAME, DEFAULT_HISTORY_LIMIT, HEADER_REQUEST_ID, HEADER_REQUEST_SAMPLED,
    MAX_HISTORY_LIMIT,
};
use crate::data::sqlite::repositories::{self as repo, TraceRequestHistoryRow};
use crate::domain::query::QueryEngine;
use crate::utils::time::now_millis;

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct CreateDebugRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[validate(length(min = 1, message = "url is required"))]
    pub url: String,
    #[validate(length(min = 1, message = "method is required"))]
    pub method: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    /// Empty or a JSON document
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DebugStatusInfo {
    pub scope_id: String,
    pub request_id: String,
    pub status: DebugStatus,
    pub status_code: i32,
}

impl DebugStatusInfo {
    fn new(scope_id: &str, request_id: &str, status: DebugStatus) -> Self {
        Self {
            scope_id: scope_id.to_string(),
            request_id: request_id.to_string(),
            status,
            status_code: status.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DebugHistory {
    pub scope_id: String,
    pub request_id: String,
    pub name: String,
    pub url: String,
    pub method: String,
    pub query: BTreeMap<String, String>,
    pub header: BTreeMap<String, String>,
    pub body: String,
    pub status: Option<DebugStatus>,
    pub status_code: i32,
    pub response_status: i32,
    pub response_body: String,
    /// Unix milliseconds
    pub create_time: i64,
    pub update_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DebugHistories {
    pub histories: Vec<DebugHistory>,
    pub limit: i64,
    pub total: i64,
}

fn decode_map(raw: &str) -> Result<BTreeMap<String, String>, DebugError> {
    if raw.is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(raw)?)
}

impl TryFrom<TraceRequestHistoryRow> for DebugHistory {
    type Error = DebugError;

    fn try_from(row: TraceRequestHistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            query: decode_map(&row.query_string)?,
            header: decode_map(&row.header)?,
            status: DebugStatus::from_i32(row.status),
            status_code: row.status,
            scope_id: row.scope_id,
            request_id: row.request_id,
            name: row.name,
            url: row.url,
            method: row.method,
            body: row.body,
            response_status: row.response_status,
            response_body: row.response_body,
            create_time: row.create_time,
            update_time: row.update_time,
        })
    }
}

/// Outbound request built and checked before anything is persisted
struct Outbound {
    method: Method,
    url: Url,
    headers: HeaderMap,
}

fn build_outbound(req: &CreateDebugRequest, request_id: &str) -> Result<Outbound, DebugError> {
    let method = Method::from_bytes(req.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| DebugError::invalid("method", format!("unsupported method '{}'", req.method)))?;

    let mut url = Url::parse(&req.url).map_err(|e| DebugError::invalid("url", e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DebugError::invalid("url", "scheme must be http or https"));
    }
    if !req.query.is_empty() {
        url.query_pairs_mut().extend_pairs(&req.query);
    }

    let mut headers = HeaderMap::new();
    for (name, value) in &req.header {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DebugError::invalid("header", format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DebugError::invalid("header", format!("{}: {}", name, e)))?;
        headers.insert(name, value);
    }
    let id = HeaderValue::from_str(request_id)
        .map_err(|e| DebugError::invalid("request_id", e.to_string()))?;
    headers.insert(HEADER_REQUEST_ID, id);
    headers.insert(HEADER_REQUEST_SAMPLED, HeaderValue::from_static("true"));

    Ok(Outbound {
        method,
        url,
        headers,
    })
}

pub struct DebugService {
    pool: SqlitePool,
    query: Arc<QueryEngine>,
    http: reqwest::Client,
}

impl DebugService {
    pub fn new(
        pool: SqlitePool,
        query: Arc<QueryEngine>,
        config: &DebugConfig,
    ) -> Result<Self, DebugError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| DebugError::Client(e.to_string()))?;
        Ok(Self { pool, query, http })
    }

    /// Persist and replay a request
    ///
    /// The HTTP outcome never fails the call: a transport error is stored as
    /// response status 0 with the error text as body.
    pub async fn create(
        &self,
        scope_id: &str,
        req: CreateDebugRequest,
    ) -> Result<DebugStatusInfo, DebugError> {
        if scope_id.is_empty() {
            return Err(DebugError::MissingParameter("scope_id"));
        }
        req.validate()
            .map_err(|e| DebugError::invalid("request", e.to_string()))?;
        if !req.body.is_empty() && serde_json::from_str::<serde::de::IgnoredAny>(&req.body).is_err()
        {
            return Err(DebugError::invalid("body", "body must be empty or valid JSON"));
        }

        let request_id = Uuid::new_v4().to_string();
        let outbound = build_outbound(&req, &request_id)?;

        let now = now_millis();
        let row = TraceRequestHistoryRow {
            scope_id: scope_id.to_string(),
            request_id: request_id.clone(),
            name: req
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_DEBUG_NAME.to_string()),
            url: req.url.clone(),
            method: outbound.method.as_str().to_string(),
            query_string: serde_json::to_string(&req.query)?,
            header: serde_json::to_string(&req.header)?,
            body: req.body.clone(),
            status: DebugStatus::Init.code(),
            response_status: 0,
            response_body: String::new(),
            create_time: now,
            update_time: now,
        };
        repo::insert_history(&self.pool, &row).await?;

        let (response_status, response_body) = self.send(outbound, req.body).await;
        tracing::debug!(
            scope_id,
            request_id = %request_id,
            response_status,
            "Debug request sent"
        );
        repo::update_response(
            &self.pool,
            scope_id,
            &request_id,
            response_status,
            &response_body,
            now_millis(),
        )
        .await?;

        Ok(DebugStatusInfo::new(scope_id, &request_id, DebugStatus::Init))
    }

    async fn send(&self, outbound: Outbound, body: String) -> (i32, String) {
        let request = self
            .http
            .request(outbound.method, outbound.url)
            .headers(outbound.headers)
            .body(body);
        match request.send().await {
            Ok(response) => {
                let status = i32::from(response.status().as_u16());
                let body = response.text().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Failed to read debug response body");
                    String::new()
                });
                (status, body)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Debug request failed");
                (0, e.to_string())
            }
        }
    }

    async fn load(&self, scope_id: &str, request_id: &str) -> Result<TraceRequestHistoryRow, DebugError> {
        repo::get_history(&self.pool, scope_id, request_id)
            .await?
            .ok_or_else(|| DebugError::not_found(scope_id, request_id))
    }

    /// Current status, advancing `Init` when spans arrived or time ran out
    pub async fn status(
        &self,
        scope_id: &str,
        request_id: &str,
    ) -> Result<DebugStatusInfo, DebugError> {
        let row = self.load(scope_id, request_id).await?;
        let current = DebugStatus::from_i32(row.status).ok_or_else(|| {
            DebugError::invalid("status", format!("unknown status code {}", row.status))
        })?;
        if current.is_terminal() {
            return Ok(DebugStatusInfo::new(scope_id, request_id, current));
        }

        let span_seen = self.query.get_span_count(request_id).await > 0;
        let elapsed_ms = now_millis().saturating_sub(row.update_time).max(0);
        let next = current.poll(span_seen, Duration::from_millis(elapsed_ms as u64));
        if next != current {
            repo::update_status(&self.pool, scope_id, request_id, next.code(), now_millis())
                .await?;
            tracing::debug!(scope_id, request_id, status = %next, "Debug request resolved");
        }
        Ok(DebugStatusInfo::new(scope_id, request_id, next))
    }

    pub async fn stop(
        &self,
        scope_id: &str,
        request_id: &str,
    ) -> Result<DebugStatusInfo, DebugError> {
        let row = self.load(scope_id, request_id).await?;
        let stopped = DebugStatus::from_i32(row.status)
            .unwrap_or(DebugStatus::Init)
            .stop();
        repo::update_status(&self.pool, scope_id, request_id, stopped.code(), now_millis()).await?;
        Ok(DebugStatusInfo::new(scope_id, request_id, stopped))
    }

    /// Newest first with the scope's total
    pub async fn histories(
        &self,
        scope_id: &str,
        limit: Option<i64>,
    ) -> Result<DebugHistories, DebugError> {
        if scope_id.is_empty() {
            return Err(DebugError::MissingParameter("scope_id"));
        }
        let limit = match limit {
            Some(l) if l > 0 => l.min(MAX_HISTORY_LIMIT),
            _ => DEFAULT_HISTORY_LIMIT,
        };
        let rows = repo::list_histories(&self.pool, scope_id, limit).await?;
        let total = repo::count_histories(&self.pool, scope_id).await?;
        let histories = rows
            .into_iter()
            .map(DebugHistory::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DebugHistories {
            histories,
            limit,
            total,
        })
    }

    pub async fn history(
        &self,
        scope_id: &str,
        request_id: &str,
    ) -> Result<DebugHistory, DebugError> {
        self.load(scope_id, request_id).await?.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::SqliteService;
    use crate::data::{MemorySpanStorage, SpanStorage};
    use crate::domain::query::DisabledMetricQuery;
    use crate::domain::span::Span;
    use axum::Router;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::routing::any;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    async fn service(storage: MemorySpanStorage) -> (DebugService, SqlitePool) {
        let sqlite = SqliteService::in_memory().await.unwrap();
        let pool = sqlite.pool().clone();
        let backends: Vec<Arc<dyn SpanStorage>> = vec![Arc::new(storage)];
        let query = Arc::new(QueryEngine::new(backends, Arc::new(DisabledMetricQuery)));
        let service = DebugService::new(
            pool.clone(),
            query,
            &DebugConfig {
                http_timeout_secs: 5,
            },
        )
        .unwrap();
        (service, pool)
    }

    /// Echoes the correlation headers and query string back
    async fn echo_server() -> SocketAddr {
        async fn echo(headers: AxumHeaders, uri: axum::http::Uri, body: String) -> String {
            let header = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            format!(
                "{}|{}|{}|{}|{}",
                header("terminus-request-id"),
                header("terminus-request-sampled"),
                header("x-tenant"),
                uri.query().unwrap_or_default(),
                body
            )
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/api", any(echo)))
                .await
                .unwrap();
        });
        addr
    }

    fn request(url: String) -> CreateDebugRequest {
        CreateDebugRequest {
            url,
            method: "post".into(),
            query: BTreeMap::from([("page".to_string(), "2".to_string())]),
            header: BTreeMap::from([("x-tenant".to_string(), "acme".to_string())]),
            body: r#"{"ok":true}"#.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_sends_and_persists() {
        let addr = echo_server().await;
        let (service, _pool) = service(MemorySpanStorage::new()).await;

        let info = service
            .create("s1", request(format!("http://{}/api", addr)))
            .await
            .unwrap();
        assert_eq!(info.status, DebugStatus::Init);
        assert!(Uuid::parse_str(&info.request_id).is_ok());

        let history = service.history("s1", &info.request_id).await.unwrap();
        assert_eq!(history.name, "no name");
        assert_eq!(history.method, "POST");
        assert_eq!(history.response_status, 200);
        assert_eq!(
            history.response_body,
            format!("{}|true|acme|page=2|{{\"ok\":true}}", info.request_id)
        );
        assert_eq!(history.query.get("page").map(String::as_str), Some("2"));
        assert_eq!(history.header.get("x-tenant").map(String::as_str), Some("acme"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_recorded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (service, _pool) = service(MemorySpanStorage::new()).await;
        let info = service
            .create("s1", request(format!("http://{}/api", addr)))
            .await
            .unwrap();
        assert_eq!(info.status, DebugStatus::Init);

        let history = service.history("s1", &info.request_id).await.unwrap();
        assert_eq!(history.response_status, 0);
        assert!(!history.response_body.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let (service, pool) = service(MemorySpanStorage::new()).await;

        let mut bad_body = request("http://127.0.0.1:1/api".into());
        bad_body.body = "{not json".into();
        assert!(matches!(
            service.create("s1", bad_body).await,
            Err(DebugError::InvalidParameter { name: "body", .. })
        ));

        let no_url = request(String::new());
        assert!(matches!(
            service.create("s1", no_url).await,
            Err(DebugError::InvalidParameter { .. })
        ));

        assert!(matches!(
            service.create("", request("http://127.0.0.1:1/api".into())).await,
            Err(DebugError::MissingParameter("scope_id"))
        ));
        assert_eq!(repo::count_histories(&pool, "s1").await.unwrap(), 0);
    }

    async fn insert_init(pool: &SqlitePool, request_id: &str, update_time: i64) {
        repo::insert_history(
            pool,
            &TraceRequestHistoryRow {
                scope_id: "s1".into(),
                request_id: request_id.into(),
                name: "no name".into(),
                url: "http://svc/api".into(),
                method: "GET".into(),
                query_string: "{}".into(),
                header: "{}".into(),
                body: String::new(),
                status: DebugStatus::Init.code(),
                response_status: 200,
                response_body: String::new(),
                create_time: update_time,
                update_time,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_status_success_when_span_arrives() {
        let storage = MemorySpanStorage::new();
        let (service, pool) = service(storage.clone()).await;
        insert_init(&pool, "req-1", now_millis()).await;

        let info = service.status("s1", "req-1").await.unwrap();
        assert_eq!(info.status, DebugStatus::Init);

        let mut writer = storage.new_writer().await.unwrap();
        writer
            .write(Span {
                trace_id: "req-1".into(),
                span_id: "span-1".into(),
                tags: HashMap::from([("request_id".to_string(), "req-1".to_string())]),
                ..Default::default()
            })
            .await
            .unwrap();
        writer.close().await.unwrap();

        let info = service.status("s1", "req-1").await.unwrap();
        assert_eq!(info.status, DebugStatus::Success);
        let stored = repo::get_history(&pool, "s1", "req-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DebugStatus::Success.code());
    }

    #[tokio::test]
    async fn test_status_fails_after_timeout() {
        let (service, pool) = service(MemorySpanStorage::new()).await;
        insert_init(&pool, "req-1", now_millis() - 21 * 60 * 1000).await;

        let info = service.status("s1", "req-1").await.unwrap();
        assert_eq!(info.status, DebugStatus::Fail);
        assert_eq!(info.status_code, 2);
    }

    #[tokio::test]
    async fn test_stop_and_terminal_status() {
        let (service, pool) = service(MemorySpanStorage::new()).await;
        insert_init(&pool, "req-1", now_millis()).await;

        let info = service.stop("s1", "req-1").await.unwrap();
        assert_eq!(info.status, DebugStatus::Stop);
        let info = service.status("s1", "req-1").await.unwrap();
        assert_eq!(info.status, DebugStatus::Stop);
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let (service, _pool) = service(MemorySpanStorage::new()).await;
        assert!(matches!(
            service.status("s1", "nope").await,
            Err(DebugError::NotFound { .. })
        ));
        assert!(matches!(
            service.stop("s1", "nope").await,
            Err(DebugError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_histories_limit_and_total() {
        let (service, pool) = service(MemorySpanStorage::new()).await;
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            insert_init(&pool, id, 1_000 + i as i64).await;
        }

        let page = service.histories("s1", Some(2)).await.unwrap();
        assert_eq!(page.limit, 2);
        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.histories.iter().map(|h| h.request_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        let page = service.histories("s1", None).await.unwrap();
        assert_eq!(page.limit, 20);
        let page = service.histories("s1", Some(1_000)).await.unwrap();
        assert_eq!(page.limit, 200);
    }
}
