//! Core application

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::Registry;
use tokio::task::JoinHandle;

use crate::api::ApiServer;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{DEFAULT_LOG_FILTER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::topics::TopicService;
use crate::data::{SpanBackends, SqliteService};
use crate::domain::debug::DebugService;
use crate::domain::ingest::{
    ConsumerEngine, ConsumerStats, IngestMetrics, MetadataEnricher, StaticMetadataSource,
};
use crate::domain::query::{DisabledMetricQuery, HttpMetricQuery, MetricQuery, QueryEngine};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub sqlite: Arc<SqliteService>,
    pub topics: Arc<TopicService>,
    pub backends: Arc<SpanBackends>,
    pub metrics: IngestMetrics,
    pub query: Arc<QueryEngine>,
    pub debug: Arc<DebugService>,
    pub consumer_stats: Arc<ConsumerStats>,
    consumer: Option<ConsumerEngine>,
    backend_tasks: Vec<JoinHandle<()>>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        let (cli_config, command) = cli::parse();
        Self::init_logging(cli_config.log_json);

        tracing::debug!(command = ?command, "Application starting");

        match command {
            Some(Commands::Check) => {
                AppConfig::load(&cli_config)?;
                tracing::info!("Configuration is valid");
                Ok(())
            }
            Some(Commands::Start) | None => {
                let app = Self::init(&cli_config).await?;
                Self::start_server(app).await
            }
        }
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init().await?;

        let sqlite = Arc::new(
            SqliteService::init(&storage)
                .await
                .context("Failed to initialize debug history database")?,
        );
        let shutdown = ShutdownService::new(sqlite.clone());

        let topics = Arc::new(
            TopicService::from_config(&config.bus)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize topic service: {}", e))?,
        );
        tracing::debug!(backend = topics.backend_name(), "Topics initialized");

        let (backends, backend_tasks) = SpanBackends::init(&config, shutdown.subscribe())
            .await
            .context("Failed to initialize span backends")?;
        let backends = Arc::new(backends);

        let metrics = IngestMetrics::new(Arc::new(Registry::new()))
            .context("Failed to register ingest metrics")?;

        let metric_query: Arc<dyn MetricQuery> = match config.metrics_query {
            Some(ref mq) => Arc::new(HttpMetricQuery::new(mq)?),
            None => Arc::new(DisabledMetricQuery),
        };
        let query = Arc::new(QueryEngine::new(
            backends.storages().to_vec(),
            metric_query,
        ));

        let debug = Arc::new(DebugService::new(
            sqlite.pool().clone(),
            query.clone(),
            &config.debug,
        )?);

        let consumer = if config.ingest.enabled {
            let enricher = Arc::new(MetadataEnricher::new(
                Arc::new(StaticMetadataSource::new(config.metadata.scopes.clone())),
                Duration::from_secs(config.metadata.ttl_secs),
                metrics.clone(),
            ));
            Some(ConsumerEngine::new(
                config.ingest.clone(),
                topics.clone(),
                backends.clone(),
                enricher,
                metrics.clone(),
            ))
        } else {
            tracing::info!("Ingest consumers disabled");
            None
        };
        let consumer_stats = consumer
            .as_ref()
            .map(ConsumerEngine::stats)
            .unwrap_or_default();

        Ok(Self {
            shutdown,
            config,
            storage,
            sqlite,
            topics,
            backends,
            metrics,
            query,
            debug,
            consumer_stats,
            consumer,
            backend_tasks,
        })
    }

    fn init_logging(json: bool) {
        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        let builder = tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_env_filter(filter);

        if json {
            builder.json().init();
        } else {
            builder.with_ansi(true).compact().init();
        }
    }

    async fn start_server(mut app: Self) -> Result<()> {
        // Signal handlers first so an early Ctrl+C still drains cleanly
        app.shutdown.install_signal_handlers();
        app.start_background_tasks().await;

        tracing::info!(
            host = %app.config.server.host,
            port = app.config.server.port,
            bus = app.topics.backend_name(),
            backends = ?app.backends.names(),
            data_dir = %app.storage.data_dir().display(),
            "Tracehouse started"
        );

        let app = ApiServer::new(app).start().await?;
        app.shutdown.shutdown().await;
        Ok(())
    }

    /// Spawn the checkpoint task, backend workers and ingest consumers
    pub async fn start_background_tasks(&mut self) {
        self.shutdown
            .register(self.sqlite.start_checkpoint_task(self.shutdown.subscribe()))
            .await;

        self.shutdown
            .register_all(std::mem::take(&mut self.backend_tasks))
            .await;

        // Backends close only after the consumers have drained into them
        let ingest = self.consumer.take().map(|consumer| {
            let shutdown = self.shutdown.clone();
            let shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = consumer.run(shutdown_rx).await {
                    tracing::error!(error = %e, "Ingest pipeline stopped, shutting down");
                    shutdown.trigger();
                }
            })
        });
        let backends = Arc::clone(&self.backends);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            match ingest {
                Some(ingest) => {
                    if let Err(e) = ingest.await {
                        tracing::error!(error = %e, "Ingest pipeline task panicked");
                    }
                }
                None => shutdown.wait().await,
            }
            backends.close();
        });
        self.shutdown.register(handle).await;

        tracing::debug!("Background tasks started");
    }
}
