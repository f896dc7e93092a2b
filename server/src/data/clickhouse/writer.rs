//! Batched span writes
//!
//! Writers hand whole flushes to a fixed pool of batch workers over a bounded
//! channel. Each worker encodes the batch into series and meta rows, then
//! sends it while holding a permit from a process-wide semaphore, so retry
//! backoff can never grow the number of concurrent inserts.
//!
//! Workers keep receiving until every `BatchPool` handle is dropped, so
//! batches flushed while the process drains on shutdown are still sent.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use clickhouse::{Client, Row};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::ClickhouseError;
use super::schema::{META_TABLE, SERIES_TABLE};
use super::series::{SeriesCache, series_id};
use crate::data::error::StorageError;
use crate::data::traits::SpanWriter;
use crate::domain::span::Span;
use crate::utils::retry::{RetryPolicy, retry_with_backoff_if_async};

/// Tag holding the tenant a span belongs to
pub const TAG_ORG_NAME: &str = "org_name";

#[derive(Debug, Clone, Row, Serialize)]
pub struct SeriesRow {
    pub org_name: String,
    pub series_id: u64,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub operation_name: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(with = "clickhouse::serde::time::datetime64::nanos")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Row, Serialize)]
pub struct MetaRow {
    pub org_name: String,
    pub series_id: u64,
    pub key: String,
    pub value: String,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    pub create_at: OffsetDateTime,
}

/// Rows for one flush
#[derive(Debug, Default)]
pub struct EncodedBatch {
    pub series: Vec<SeriesRow>,
    pub meta: Vec<MetaRow>,
    /// Series ids whose meta rows this batch carries
    pub new_series: Vec<u64>,
}

impl EncodedBatch {
    /// Meta rows are emitted once per series id unknown to `cache`
    pub fn encode(spans: Vec<Span>, cache: &SeriesCache) -> Self {
        let create_at = OffsetDateTime::now_utc();
        let mut batch = Self::default();
        let mut pending = HashSet::new();

        for span in spans {
            let id = series_id(&span.tags);
            let org_name = span.tag(TAG_ORG_NAME).unwrap_or_default().to_string();

            if !cache.contains(id) && pending.insert(id) {
                batch.new_series.push(id);
                batch.meta.extend(span.tags.iter().map(|(key, value)| MetaRow {
                    org_name: org_name.clone(),
                    series_id: id,
                    key: key.clone(),
                    value: value.clone(),
                    create_at,
                }));
            }

            let timestamp = OffsetDateTime::from_unix_timestamp_nanos(i128::from(span.start_time))
                .unwrap_or(OffsetDateTime::UNIX_EPOCH);
            batch.series.push(SeriesRow {
                org_name,
                series_id: id,
                trace_id: span.trace_id,
                span_id: span.span_id,
                parent_span_id: span.parent_span_id,
                operation_name: span.operation_name,
                start_time: span.start_time,
                end_time: span.end_time,
                timestamp,
            });
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Destination of encoded batches
///
/// One call is one attempt: open the inserts, append every row, finish. An
/// append failure must surface as [`ClickhouseError::Append`].
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn send(&self, batch: &EncodedBatch) -> Result<(), ClickhouseError>;
}

pub struct ClientSink {
    client: Client,
}

impl ClientSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchSink for ClientSink {
    async fn send(&self, batch: &EncodedBatch) -> Result<(), ClickhouseError> {
        if !batch.meta.is_empty() {
            let mut insert: clickhouse::insert::Insert<MetaRow> =
                self.client.insert(META_TABLE).await?;
            for row in &batch.meta {
                insert
                    .write(row)
                    .await
                    .map_err(|e| ClickhouseError::Append {
                        table: META_TABLE,
                        error: e.to_string(),
                    })?;
            }
            insert.end().await?;
        }

        let mut insert: clickhouse::insert::Insert<SeriesRow> =
            self.client.insert(SERIES_TABLE).await?;
        for row in &batch.series {
            insert
                .write(row)
                .await
                .map_err(|e| ClickhouseError::Append {
                    table: SERIES_TABLE,
                    error: e.to_string(),
                })?;
        }
        insert.end().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub max_in_flight: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

#[derive(Debug, Default)]
pub struct PoolStats {
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
    pub retries: AtomicU64,
}

struct Job {
    spans: Vec<Span>,
    done: oneshot::Sender<Result<(), ClickhouseError>>,
}

/// Handle for submitting batches to the worker pool
#[derive(Clone)]
pub struct BatchPool {
    tx: mpsc::Sender<Job>,
    stats: Arc<PoolStats>,
}

impl BatchPool {
    /// Spawn `config.workers` batch workers
    pub fn start(
        sink: Arc<dyn BatchSink>,
        cache: Arc<SeriesCache>,
        config: PoolConfig,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let stats = Arc::new(PoolStats::default());

        let handles = (0..config.workers.max(1))
            .map(|worker| {
                let ctx = WorkerContext {
                    sink: Arc::clone(&sink),
                    cache: Arc::clone(&cache),
                    semaphore: Arc::clone(&semaphore),
                    stats: Arc::clone(&stats),
                    retry: config.retry,
                };
                tokio::spawn(run_worker(worker, ctx, Arc::clone(&rx)))
            })
            .collect();

        tracing::debug!(
            workers = config.workers,
            max_in_flight = config.max_in_flight,
            "ClickHouse batch pool started"
        );

        (Self { tx, stats }, handles)
    }

    /// Queue spans and wait for the batch outcome
    pub async fn submit(&self, spans: Vec<Span>) -> Result<(), StorageError> {
        let (done, outcome) = oneshot::channel();
        self.tx
            .send(Job { spans, done })
            .await
            .map_err(|_| ClickhouseError::QueueClosed)?;
        outcome
            .await
            .map_err(|_| ClickhouseError::QueueClosed)?
            .map_err(StorageError::from)
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

struct WorkerContext {
    sink: Arc<dyn BatchSink>,
    cache: Arc<SeriesCache>,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
    retry: RetryPolicy,
}

async fn run_worker(
    worker: usize,
    ctx: WorkerContext,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
) {
    loop {
        // None once every pool handle is gone
        let Some(job) = rx.lock().await.recv().await else {
            break;
        };

        let batch = EncodedBatch::encode(job.spans, &ctx.cache);
        let result = ctx.send(&batch).await;
        if result.is_ok() {
            ctx.cache.extend(batch.new_series.iter().copied());
        }
        // Submitter may have gone away
        let _ = job.done.send(result);
    }
    tracing::debug!(worker, "ClickHouse batch worker stopped");
}

impl WorkerContext {
    async fn send(&self, batch: &EncodedBatch) -> Result<(), ClickhouseError> {
        if batch.is_empty() {
            return Ok(());
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ClickhouseError::QueueClosed)?;

        let sink = self.sink.as_ref();
        let stats = self.stats.as_ref();
        let result = retry_with_backoff_if_async(
            self.retry,
            |e: &ClickhouseError| !matches!(e, ClickhouseError::Append { .. }),
            move |attempt| {
                if attempt > 1 {
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                }
                sink.send(batch)
            },
        )
        .await;

        match result {
            Ok(((), attempts)) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    rows = batch.series.len(),
                    meta_rows = batch.meta.len(),
                    attempts,
                    "ClickHouse batch sent"
                );
                Ok(())
            }
            Err((e @ ClickhouseError::Append { .. }, _)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, rows = batch.series.len(), "Dropping ClickHouse batch");
                Err(e)
            }
            Err((e, attempts)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    attempts,
                    rows = batch.series.len(),
                    "ClickHouse batch send failed"
                );
                Err(ClickhouseError::SendExhausted {
                    attempts,
                    error: e.to_string(),
                })
            }
        }
    }
}

/// Per-worker writer buffering spans until flush
pub struct ClickhouseSpanWriter {
    pool: BatchPool,
    buffer: Vec<Span>,
    closed: bool,
}

impl ClickhouseSpanWriter {
    pub fn new(pool: BatchPool) -> Self {
        Self {
            pool,
            buffer: Vec::new(),
            closed: false,
        }
    }
}

#[async_trait]
impl SpanWriter for ClickhouseSpanWriter {
    async fn write(&mut self, span: Span) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed("writer"));
        }
        self.buffer.push(span);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let spans = std::mem::take(&mut self.buffer);
        self.pool.submit(spans).await
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        let result = self.flush().await;
        self.closed = true;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct ScriptedSink {
        failures: parking_lot::Mutex<VecDeque<ClickhouseError>>,
        calls: AtomicU32,
        sent: parking_lot::Mutex<Vec<(usize, usize)>>,
    }

    impl ScriptedSink {
        fn failing(failures: Vec<ClickhouseError>) -> Self {
            Self {
                failures: parking_lot::Mutex::new(failures.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BatchSink for ScriptedSink {
        async fn send(&self, batch: &EncodedBatch) -> Result<(), ClickhouseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.failures.lock().pop_front() {
                return Err(e);
            }
            self.sent.lock().push((batch.series.len(), batch.meta.len()));
            Ok(())
        }
    }

    fn span(span_id: &str, service: &str) -> Span {
        Span {
            trace_id: "trace-1".into(),
            span_id: span_id.into(),
            parent_span_id: String::new(),
            operation_name: "GET /".into(),
            start_time: 1_700_000_000_000_000_000,
            end_time: 1_700_000_000_500_000_000,
            tags: HashMap::from([
                ("service_name".to_string(), service.to_string()),
                (TAG_ORG_NAME.to_string(), "erda".to_string()),
            ]),
        }
    }

    fn config(max_retries: u32) -> PoolConfig {
        PoolConfig {
            workers: 2,
            max_in_flight: 1,
            queue_capacity: 4,
            retry: RetryPolicy {
                max_attempts: max_retries + 1,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
        }
    }

    fn start(sink: Arc<ScriptedSink>, cache: Arc<SeriesCache>, max_retries: u32) -> BatchPool {
        let (pool, _handles) = BatchPool::start(sink, cache, config(max_retries));
        pool
    }

    #[test]
    fn test_encode_emits_meta_once_per_series() {
        let cache = SeriesCache::new();
        let batch = EncodedBatch::encode(
            vec![span("a", "api"), span("b", "api"), span("c", "db")],
            &cache,
        );
        assert_eq!(batch.series.len(), 3);
        assert_eq!(batch.new_series.len(), 2);
        assert_eq!(batch.meta.len(), 4);
        assert_eq!(batch.series[0].org_name, "erda");
        assert_eq!(batch.series[0].series_id, batch.series[1].series_id);
        assert_eq!(
            batch.series[0].timestamp.unix_timestamp_nanos(),
            1_700_000_000_000_000_000
        );
    }

    #[test]
    fn test_encode_skips_known_series() {
        let cache = SeriesCache::new();
        cache.extend([series_id(&span("a", "api").tags)]);
        let batch = EncodedBatch::encode(vec![span("a", "api")], &cache);
        assert_eq!(batch.series.len(), 1);
        assert!(batch.meta.is_empty());
        assert!(batch.new_series.is_empty());
    }

    #[tokio::test]
    async fn test_successful_send_grows_cache() {
        let sink = Arc::new(ScriptedSink::default());
        let cache = Arc::new(SeriesCache::new());
        let pool = start(Arc::clone(&sink), Arc::clone(&cache), 2);

        pool.submit(vec![span("a", "api")]).await.unwrap();
        pool.submit(vec![span("b", "api")]).await.unwrap();

        assert_eq!(cache.len(), 1);
        // Second batch reuses the cached series
        assert_eq!(*sink.sent.lock(), vec![(1, 2), (1, 0)]);
        assert_eq!(pool.stats().sent.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let sink = Arc::new(ScriptedSink::failing(vec![ClickhouseError::Connection(
            "reset".into(),
        )]));
        let cache = Arc::new(SeriesCache::new());
        let pool = start(Arc::clone(&sink), cache, 2);

        pool.submit(vec![span("a", "api")]).await.unwrap();
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().retries.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_append_failure_drops_batch_without_retry() {
        let sink = Arc::new(ScriptedSink::failing(vec![ClickhouseError::Append {
            table: SERIES_TABLE,
            error: "bad row".into(),
        }]));
        let cache = Arc::new(SeriesCache::new());
        let pool = start(Arc::clone(&sink), Arc::clone(&cache), 3);

        let err = pool.submit(vec![span("a", "api")]).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Clickhouse(ClickhouseError::Append { .. })
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
        assert_eq!(pool.stats().dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_send_gives_up_after_max_retries() {
        let failures = (0..5)
            .map(|_| ClickhouseError::Connection("down".into()))
            .collect();
        let sink = Arc::new(ScriptedSink::failing(failures));
        let pool = start(Arc::clone(&sink), Arc::new(SeriesCache::new()), 2);

        let err = pool.submit(vec![span("a", "api")]).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Clickhouse(ClickhouseError::SendExhausted { attempts: 3, .. })
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_workers_serve_open_writers_until_last_handle_drops() {
        let sink = Arc::new(ScriptedSink::default());
        let (pool, handles) =
            BatchPool::start(Arc::clone(&sink) as Arc<dyn BatchSink>, Arc::new(SeriesCache::new()), config(0));
        let mut writer = ClickhouseSpanWriter::new(pool.clone());
        drop(pool);

        writer.write(span("a", "api")).await.unwrap();
        writer.write(span("b", "api")).await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(*sink.sent.lock(), vec![(2, 2)]);

        drop(writer);
        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_writer_flushes_buffer_through_pool() {
        let sink = Arc::new(ScriptedSink::default());
        let pool = start(Arc::clone(&sink), Arc::new(SeriesCache::new()), 0);
        let mut writer = ClickhouseSpanWriter::new(pool);

        writer.write(span("a", "api")).await.unwrap();
        writer.write(span("b", "db")).await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(*sink.sent.lock(), vec![(2, 4)]);
        assert!(matches!(
            writer.write(span("c", "api")).await,
            Err(StorageError::Closed(_))
        ));
    }
}
