//! Health check endpoint

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::future::join_all;
use serde::Serialize;
use utoipa::ToSchema;

use crate::data::SpanBackends;
use crate::data::topics::TopicService;

#[derive(Clone)]
pub struct HealthState {
    pub topics: Arc<TopicService>,
    pub backends: Arc<SpanBackends>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(name: &'static str, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                name,
                healthy: true,
                error: None,
            },
            Err(e) => Self {
                name,
                healthy: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub bus: ComponentHealth,
    pub backends: Vec<ComponentHealth>,
}

/// Health of the message bus and every span backend
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "All components are healthy", body = HealthResponse),
        (status = 503, description = "At least one component is unhealthy", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let bus = ComponentHealth::from_result(
        state.topics.backend_name(),
        state.topics.health_check().await,
    );
    let backends = join_all(state.backends.storages().iter().map(|storage| async move {
        ComponentHealth::from_result(storage.name(), storage.health_check().await)
    }))
    .await;

    let healthy = bus.healthy && backends.iter().all(|b| b.healthy);
    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthResponse {
            status: label,
            version: env!("CARGO_PKG_VERSION"),
            bus,
            backends,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemorySpanStorage, SpanStorage};

    #[tokio::test]
    async fn test_health_ok_with_memory_components() {
        let storages: Vec<Arc<dyn SpanStorage>> = vec![Arc::new(MemorySpanStorage::new())];
        let state = HealthState {
            topics: Arc::new(TopicService::new()),
            backends: Arc::new(SpanBackends::from_storages(storages)),
        };
        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_component_health_from_error() {
        let c = ComponentHealth::from_result("clickhouse", Err::<(), _>("down"));
        assert!(!c.healthy);
        assert_eq!(c.error.as_deref(), Some("down"));
    }
}
