//! ClickHouse span backend
//!
//! Spans go to `spans_series`, their tag sets to `spans_meta` keyed by a
//! hash of the tag set. Writes are batched through a worker pool with a
//! process-wide limit on concurrent inserts.

pub mod error;
pub mod reader;
pub mod schema;
pub mod series;
pub mod writer;

pub use error::ClickhouseError;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use clickhouse::Client;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use self::reader::ClickhousePageSource;
use self::series::SeriesCache;
use self::writer::{BatchPool, ClickhouseSpanWriter, ClientSink, PoolConfig};
use crate::core::config::ClickhouseConfig;
use crate::core::constants::{
    CLICKHOUSE_HEALTH_CHECK_INTERVAL_SECS, CLICKHOUSE_QUEUE_CAPACITY, STORAGE_PAGE_SIZE,
};
use crate::data::cursor::PagedIterator;
use crate::data::error::StorageError;
use crate::data::traits::{Selector, SpanIterator, SpanStorage, SpanWriter};
use crate::utils::retry::RetryPolicy;

pub struct ClickhouseService {
    client: Client,
    config: ClickhouseConfig,
    /// Taken on close; batch workers exit once the last writer drops its clone
    pool: Mutex<Option<BatchPool>>,
}

impl ClickhouseService {
    /// Connect, migrate, seed the series cache and start the batch pool
    ///
    /// Returns the pool's worker handles for shutdown registration.
    pub async fn init(
        config: &ClickhouseConfig,
    ) -> Result<(Self, Vec<JoinHandle<()>>), ClickhouseError> {
        let client = Self::build_client(config);

        run_migrations(&client, config).await?;

        let cache = Arc::new(SeriesCache::load(&client).await?);
        let pool_config = PoolConfig {
            workers: config.workers,
            max_in_flight: config.max_in_flight,
            queue_capacity: CLICKHOUSE_QUEUE_CAPACITY,
            retry: RetryPolicy {
                max_attempts: config.max_retries.saturating_add(1),
                base_delay_ms: config.retry_base_ms,
                max_delay_ms: config.retry_max_ms,
            },
        };
        let (pool, handles) = BatchPool::start(
            Arc::new(ClientSink::new(client.clone())),
            Arc::clone(&cache),
            pool_config,
        );

        tracing::debug!(
            url = %config.url,
            database = %config.database,
            compression = %config.compression,
            known_series = cache.len(),
            "ClickhouseService initialized"
        );

        Ok((
            Self {
                client,
                config: config.clone(),
                pool: Mutex::new(Some(pool)),
            },
            handles,
        ))
    }

    fn build_client(config: &ClickhouseConfig) -> Client {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        if let Some(ref user) = config.user {
            client = client.with_user(user);
        }
        if let Some(ref password) = config.password {
            client = client.with_password(password);
        }
        if config.compression {
            client = client.with_compression(clickhouse::Compression::Lz4);
        }
        client
    }

    pub async fn health_check(&self) -> Result<(), ClickhouseError> {
        self.client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(ClickhouseError::from)
    }

    pub fn start_health_check_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(CLICKHOUSE_HEALTH_CHECK_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("ClickHouse health check task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = service.health_check().await {
                            tracing::warn!(error = %e, database = %service.config.database, "ClickHouse health check failed");
                        }
                    }
                }
            }
        })
    }
}

async fn run_migrations(client: &Client, config: &ClickhouseConfig) -> Result<(), ClickhouseError> {
    let table_exists: bool = client
        .query(
            "SELECT count() > 0 FROM system.tables WHERE database = currentDatabase() AND name = 'schema_version'",
        )
        .fetch_one()
        .await
        .map_err(|e| {
            ClickhouseError::Connection(format!(
                "Failed to check schema_version table: {}. Verify ClickHouse is running and accessible.",
                e
            ))
        })?;

    let current_version: Option<i32> = if table_exists {
        client
            .query("SELECT version FROM schema_version FINAL WHERE id = 1")
            .fetch_optional()
            .await?
    } else {
        None
    };

    match current_version {
        None => apply_initial_schema(client, config).await,
        Some(v) if v > schema::SCHEMA_VERSION => Err(ClickhouseError::MigrationFailed {
            version: v,
            name: "version_check".to_string(),
            error: format!(
                "Database schema version {} is newer than application version {}. Upgrade the application.",
                v,
                schema::SCHEMA_VERSION
            ),
        }),
        Some(v) if v < schema::SCHEMA_VERSION => Err(ClickhouseError::MigrationFailed {
            version: v + 1,
            name: "unknown".to_string(),
            error: format!("No migration defined from version {}", v),
        }),
        Some(_) => {
            tracing::debug!(
                version = schema::SCHEMA_VERSION,
                "ClickHouse schema is up to date"
            );
            Ok(())
        }
    }
}

async fn apply_initial_schema(
    client: &Client,
    config: &ClickhouseConfig,
) -> Result<(), ClickhouseError> {
    let statements = schema::generate_schema(config);
    tracing::debug!(
        version = schema::SCHEMA_VERSION,
        statements = statements.len(),
        ttl_days = config.ttl_days,
        "Applying ClickHouse schema"
    );

    for sql in &statements {
        client
            .query(sql)
            .execute()
            .await
            .map_err(|e| ClickhouseError::MigrationFailed {
                version: schema::SCHEMA_VERSION,
                name: "initial_schema".to_string(),
                error: e.to_string(),
            })?;
    }

    client
        .query(
            "INSERT INTO schema_version (id, version, applied_at, description) VALUES (?, ?, ?, ?)",
        )
        .bind(1u8)
        .bind(schema::SCHEMA_VERSION)
        .bind(chrono::Utc::now().timestamp())
        .bind("Initial schema")
        .execute()
        .await?;
    Ok(())
}

#[async_trait]
impl SpanStorage for ClickhouseService {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn new_writer(&self) -> Result<Box<dyn SpanWriter>, StorageError> {
        let pool = self.pool.lock().clone().ok_or(StorageError::ShuttingDown {
            backend: "clickhouse",
        })?;
        Ok(Box::new(ClickhouseSpanWriter::new(pool)))
    }

    async fn iterator(&self, selector: &Selector) -> Result<Box<dyn SpanIterator>, StorageError> {
        Ok(Box::new(PagedIterator::new(
            ClickhousePageSource::new(self.client.clone(), selector.trace_id.clone()),
            STORAGE_PAGE_SIZE,
        )))
    }

    async fn count(&self, trace_id: &str) -> Result<i64, StorageError> {
        let count = reader::count_spans(&self.client, trace_id).await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        ClickhouseService::health_check(self).await?;
        Ok(())
    }

    fn close(&self) {
        if let Some(pool) = self.pool.lock().take() {
            let stats = pool.stats();
            tracing::debug!(
                sent = stats.sent.load(Ordering::Relaxed),
                dropped = stats.dropped.load(Ordering::Relaxed),
                retries = stats.retries.load(Ordering::Relaxed),
                "ClickHouse batch pool closed to new writers"
            );
        }
    }
}

#[cfg(test)]
impl ClickhouseService {
    /// Service whose batches go to `sink` instead of a server
    pub(crate) fn with_sink(
        sink: Arc<dyn writer::BatchSink>,
        config: PoolConfig,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (pool, handles) = BatchPool::start(sink, Arc::new(SeriesCache::new()), config);
        let service = Self {
            client: Client::default(),
            config: ClickhouseConfig {
                url: String::new(),
                database: "default".to_string(),
                user: None,
                password: None,
                compression: false,
                ttl_days: 1,
                workers: config.workers,
                max_in_flight: config.max_in_flight,
                max_retries: config.retry.max_attempts.saturating_sub(1),
                retry_base_ms: config.retry.base_delay_ms,
                retry_max_ms: config.retry.max_delay_ms,
            },
            pool: Mutex::new(Some(pool)),
        };
        (service, handles)
    }
}
