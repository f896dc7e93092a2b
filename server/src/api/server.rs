//! API server initialization

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

use super::middleware;
use super::openapi::{openapi_json, swagger_ui_html};
use super::routes::debug::DebugApiState;
use super::routes::health::HealthState;
use super::routes::ingest::IngestApiState;
use super::routes::traces::TraceApiState;
use super::routes::{debug, health, ingest, metrics, traces};
use crate::core::CoreApp;
use crate::core::constants::DEFAULT_BODY_LIMIT;

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Build the full router
    pub fn router(app: &CoreApp) -> Router {
        let health_state = HealthState {
            topics: app.topics.clone(),
            backends: app.backends.clone(),
        };
        let ingest_state = IngestApiState {
            topics: app.topics.clone(),
            known_topics: Arc::new(
                app.config
                    .ingest
                    .topics
                    .iter()
                    .map(|t| t.name.clone())
                    .collect::<HashSet<_>>(),
            ),
            stats: app.consumer_stats.clone(),
        };
        let trace_state = TraceApiState {
            query: app.query.clone(),
        };
        let debug_state = DebugApiState {
            debug: app.debug.clone(),
        };

        Router::new()
            .route(
                "/api/v1/health",
                get(health::health).with_state(health_state),
            )
            .route(
                "/metrics",
                get(metrics::metrics).with_state(app.metrics.clone()),
            )
            .route("/api/openapi.json", get(openapi_json))
            .route("/api/docs", get(swagger_ui_html))
            .nest(
                "/api/v1/ingest",
                ingest::routes(ingest_state).layer(RequestDecompressionLayer::new()),
            )
            .nest(
                "/api/v1/scopes/{scope_id}/traces",
                traces::scoped_routes(trace_state.clone()),
            )
            .nest("/api/v1/traces", traces::routes(trace_state))
            .nest("/api/v1/scopes/{scope_id}/debug", debug::routes(debug_state))
            .fallback(middleware::handle_404)
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::trace())
                    .layer(CompressionLayer::new())
                    .layer(middleware::cors())
                    .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT)),
            )
    }

    /// Serve until shutdown; returns the app for cleanup
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app } = self;
        let shutdown = app.shutdown.clone();

        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);
        let router = Self::router(&app);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(address = %addr, "HTTP server listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}
