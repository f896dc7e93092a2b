//! Data storage layer
//!
//! - `topics` - Message bus topics feeding the ingest pipeline
//! - `traits` - `SpanStorage` capability implemented by every span backend
//! - `cassandra`, `clickhouse`, `elasticsearch` - Durable span backends
//! - `memory` - Local span backend used when no durable backend is configured
//! - `cursor` - Keyset-paged cursor shared by the backends
//! - `multi` - Fan-out writer over the enabled backends
//! - `sqlite` - Debug request history
//! - `error` - Unified span storage error

pub mod cassandra;
pub mod clickhouse;
pub mod cursor;
pub mod elasticsearch;
pub mod error;
pub mod memory;
pub mod multi;
pub mod sqlite;
pub mod topics;
pub mod traits;

pub use cassandra::CassandraService;
pub use clickhouse::ClickhouseService;
pub use elasticsearch::ElasticsearchService;
pub use error::StorageError;
pub use memory::MemorySpanStorage;
pub use multi::MultiWriter;
pub use sqlite::SqliteService;
pub use traits::{Hint, Selector, SpanIterator, SpanStorage, SpanWriter};

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::{AppConfig, CassandraConfig, ClickhouseConfig, ElasticsearchConfig};

/// A span backend switched on by configuration
#[derive(Debug, Clone, Copy)]
pub enum BackendSpec<'a> {
    Cassandra(&'a CassandraConfig),
    Clickhouse(&'a ClickhouseConfig),
    Elasticsearch(&'a ElasticsearchConfig),
}

impl BackendSpec<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cassandra(_) => "cassandra",
            Self::Clickhouse(_) => "clickhouse",
            Self::Elasticsearch(_) => "elasticsearch",
        }
    }
}

/// Enabled backends in fan-out order; empty means spans stay in memory
pub fn enabled_backends(config: &AppConfig) -> Vec<BackendSpec<'_>> {
    let mut specs = Vec::new();
    if let Some(ref cassandra) = config.cassandra {
        specs.push(BackendSpec::Cassandra(cassandra));
    }
    if let Some(ref clickhouse) = config.clickhouse {
        specs.push(BackendSpec::Clickhouse(clickhouse));
    }
    if let Some(ref elasticsearch) = config.elasticsearch {
        specs.push(BackendSpec::Elasticsearch(elasticsearch));
    }
    specs
}

/// The span backends enabled by configuration
///
/// Each backend holds a complete copy of the spans written to it. When no
/// durable backend is configured spans are kept in memory.
pub struct SpanBackends {
    storages: Vec<Arc<dyn SpanStorage>>,
}

impl SpanBackends {
    /// Connect every configured backend
    ///
    /// Returns background task handles (ClickHouse batch workers and health
    /// checks) for shutdown registration.
    pub async fn init(
        config: &AppConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(Self, Vec<JoinHandle<()>>), StorageError> {
        let mut storages: Vec<Arc<dyn SpanStorage>> = Vec::new();
        let mut handles = Vec::new();

        for spec in enabled_backends(config) {
            match spec {
                BackendSpec::Cassandra(cassandra) => {
                    storages.push(Arc::new(CassandraService::init(cassandra).await?));
                }
                BackendSpec::Clickhouse(clickhouse) => {
                    let (service, workers) = ClickhouseService::init(clickhouse).await?;
                    let service = Arc::new(service);
                    handles.extend(workers);
                    handles.push(service.start_health_check_task(shutdown_rx.clone()));
                    storages.push(service);
                }
                BackendSpec::Elasticsearch(elasticsearch) => {
                    storages.push(Arc::new(ElasticsearchService::init(elasticsearch).await?));
                }
            }
        }

        if storages.is_empty() {
            tracing::warn!("No span backend configured, spans are kept in memory only");
            storages.push(Arc::new(MemorySpanStorage::new()));
        }

        let backends = Self { storages };
        tracing::debug!(backends = ?backends.names(), "Span backends initialized");
        Ok((backends, handles))
    }

    #[cfg(test)]
    pub fn from_storages(storages: Vec<Arc<dyn SpanStorage>>) -> Self {
        Self { storages }
    }

    pub fn storages(&self) -> &[Arc<dyn SpanStorage>] {
        &self.storages
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.storages.iter().map(|s| s.name()).collect()
    }

    /// Open one writer per backend behind a fan-out writer
    pub async fn writer(&self) -> Result<MultiWriter, StorageError> {
        MultiWriter::open(&self.storages).await
    }

    /// Close every backend to new writers
    ///
    /// Call once the ingest pipeline has drained; background workers finish
    /// after the writers still open are dropped.
    pub fn close(&self) {
        for storage in &self.storages {
            storage.close();
        }
        tracing::debug!(backends = ?self.names(), "Span backends closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writer_reaches_every_backend() {
        let a = MemorySpanStorage::new();
        let b = MemorySpanStorage::new();
        let storages: Vec<Arc<dyn SpanStorage>> = vec![Arc::new(a.clone()), Arc::new(b.clone())];
        let backends = SpanBackends::from_storages(storages);
        assert_eq!(backends.names(), vec!["memory", "memory"]);

        let mut writer = backends.writer().await.unwrap();
        writer
            .write(crate::domain::span::Span {
                trace_id: "t".into(),
                span_id: "s".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        writer.close().await.unwrap();

        assert_eq!(a.count("t").await.unwrap(), 1);
        assert_eq!(b.count("t").await.unwrap(), 1);
    }
}
