//! Span ingest endpoint
//!
//! Publishes raw span records onto a configured topic. A JSON array body is
//! split into one record per element; any other body is published as-is.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::api::types::ApiError;
use crate::data::topics::TopicService;
use crate::domain::ingest::{ConsumerStats, ConsumerStatsSnapshot};

#[derive(Clone)]
pub struct IngestApiState {
    pub topics: Arc<TopicService>,
    /// Topic names the consumers read
    pub known_topics: Arc<HashSet<String>>,
    pub stats: Arc<ConsumerStats>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishResponse {
    pub topic: String,
    pub published: usize,
    pub ids: Vec<String>,
}

pub fn routes(state: IngestApiState) -> Router<()> {
    Router::new()
        .route("/stats", get(ingest_stats))
        .route("/{topic}", post(publish))
        .with_state(state)
}

/// Split a payload into records
///
/// Returns `None` for an empty body.
fn split_records(body: &[u8]) -> Option<Vec<Vec<u8>>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|item| serde_json::to_vec(item).ok())
                .collect(),
        ),
        _ => Some(vec![body.to_vec()]),
    }
}

/// Publish span records to a topic
#[utoipa::path(
    post,
    path = "/api/v1/ingest/{topic}",
    tag = "ingest",
    params(("topic" = String, Path, description = "Configured span topic")),
    request_body(content = String, description = "A span record or a JSON array of records"),
    responses(
        (status = 202, description = "Records accepted", body = PublishResponse),
        (status = 400, description = "Empty body"),
        (status = 404, description = "Unknown topic")
    )
)]
pub async fn publish(
    State(state): State<IngestApiState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    if !state.known_topics.contains(&topic) {
        return Err(ApiError::not_found(
            "TOPIC_NOT_FOUND",
            format!("Topic {} is not consumed by this server", topic),
        ));
    }
    let records = split_records(&body)
        .ok_or_else(|| ApiError::bad_request("EMPTY_BODY", "Request body is empty"))?;

    let handle = state.topics.topic(&topic);
    let mut ids = Vec::with_capacity(records.len());
    for record in &records {
        ids.push(handle.publish(None, record).await?);
    }
    tracing::debug!(topic = %topic, count = ids.len(), "Span records published");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            topic,
            published: ids.len(),
            ids,
        }),
    ))
}

/// Consumer counters since startup
#[utoipa::path(
    get,
    path = "/api/v1/ingest/stats",
    tag = "ingest",
    responses((status = 200, description = "Ingest counters", body = ConsumerStatsSnapshot))
)]
pub async fn ingest_stats(State(state): State<IngestApiState>) -> Json<ConsumerStatsSnapshot> {
    Json(state.stats.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> IngestApiState {
        IngestApiState {
            topics: Arc::new(TopicService::new()),
            known_topics: Arc::new(HashSet::from(["spans".to_string()])),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    #[test]
    fn test_split_records() {
        assert_eq!(split_records(b"  \n"), None);
        assert_eq!(
            split_records(br#"[{"a":1},{"b":2}]"#),
            Some(vec![br#"{"a":1}"#.to_vec(), br#"{"b":2}"#.to_vec()])
        );
        assert_eq!(split_records(b"not json"), Some(vec![b"not json".to_vec()]));
        assert_eq!(
            split_records(br#"{"traceId":"t"}"#),
            Some(vec![br#"{"traceId":"t"}"#.to_vec()])
        );
    }

    #[tokio::test]
    async fn test_publish_array_reaches_topic() {
        let state = state();
        let topic = state.topics.topic("spans");
        let mut reader = topic.subscribe("g", "c").await.unwrap();

        let (status, Json(response)) = publish(
            State(state),
            Path("spans".to_string()),
            Bytes::from_static(br#"[{"a":1},{"b":2}]"#),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(response.published, 2);

        let first = reader.recv().await.unwrap();
        assert_eq!(first.payload, br#"{"a":1}"#.to_vec());
    }

    #[tokio::test]
    async fn test_publish_unknown_topic() {
        let result = publish(
            State(state()),
            Path("other".to_string()),
            Bytes::from_static(b"{}"),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound { .. })));
    }
}
