//! Batch consumer engine
//!
//! ```text
//! topic ──▶ read batch ──▶ decode/validate/enrich ──▶ [bounded buffer] ──▶ write + flush ──▶ confirm
//! ```
//!
//! Every configured topic gets `parallelism` workers. A worker owns its own
//! consumer-group member and its own storage writer, so spans from one worker
//! are written in arrival order. Record ids are confirmed after their batch
//! was handed to storage, including ids whose record failed to decode.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use utoipa::ToSchema;
use uuid::Uuid;

use super::decode::{SpanDecoder, decoder_for, validate};
use super::enrich::MetadataEnricher;
use super::error::IngestError;
use super::metrics::{FailureStage, IngestMetrics};
use crate::core::config::{IngestConfig, TopicConfig};
use crate::core::constants::{
    INGEST_CLAIM_INTERVAL_SECS, INGEST_CLAIM_MIN_IDLE_MS, INGEST_READ_ERROR_BACKOFF_MS,
};
use crate::data::topics::{TopicConfirmer, TopicError, TopicReader, TopicRecord, TopicService};
use crate::data::{SpanBackends, SpanWriter, StorageError};
use crate::domain::span::Span;

// ============================================================================
// ERROR HANDLING POLICIES
// ============================================================================

/// A batch the writer stage could not store
#[derive(Debug)]
pub struct WriteFailure<'a> {
    pub topic: &'a str,
    pub spans: usize,
    pub error: &'a StorageError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    /// Confirm the batch anyway and keep consuming
    Continue,
    /// Stop the worker without confirming; the records stay pending
    Abort,
}

pub trait WriteErrorHandler: Send + Sync {
    fn handle(&self, failure: &WriteFailure<'_>) -> WriteDecision;
}

/// Log the failure and move on (at-most-once for the failed batch)
#[derive(Debug, Default)]
pub struct LogAndContinue;

impl WriteErrorHandler for LogAndContinue {
    fn handle(&self, failure: &WriteFailure<'_>) -> WriteDecision {
        tracing::error!(
            error = %failure.error,
            topic = failure.topic,
            spans = failure.spans,
            "Failed to write span batch, continuing"
        );
        WriteDecision::Continue
    }
}

/// What to do when confirming a stored batch fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfirmPolicy {
    /// Stop the worker with an error; the engine reports it as fatal
    #[default]
    Escalate,
    /// Log and keep consuming; the records will be redelivered
    Ignore,
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub read: AtomicU64,
    pub decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub validate_errors: AtomicU64,
    pub metadata_errors: AtomicU64,
    pub written: AtomicU64,
    pub write_errors: AtomicU64,
    pub confirmed: AtomicU64,
    pub read_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConsumerStatsSnapshot {
    pub read: u64,
    pub decoded: u64,
    pub decode_errors: u64,
    pub validate_errors: u64,
    pub metadata_errors: u64,
    pub written: u64,
    pub write_errors: u64,
    pub confirmed: u64,
    pub read_errors: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ConsumerStatsSnapshot {
            read: get(&self.read),
            decoded: get(&self.decoded),
            decode_errors: get(&self.decode_errors),
            validate_errors: get(&self.validate_errors),
            metadata_errors: get(&self.metadata_errors),
            written: get(&self.written),
            write_errors: get(&self.write_errors),
            confirmed: get(&self.confirmed),
            read_errors: get(&self.read_errors),
        }
    }
}

fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

// ============================================================================
// ENGINE
// ============================================================================

/// Records read together, with the spans that survived decoding
struct Batch {
    ids: Vec<String>,
    spans: Vec<Span>,
}

pub struct ConsumerEngine {
    config: IngestConfig,
    topics: Arc<TopicService>,
    backends: Arc<SpanBackends>,
    enricher: Arc<MetadataEnricher>,
    metrics: IngestMetrics,
    stats: Arc<ConsumerStats>,
    error_handler: Arc<dyn WriteErrorHandler>,
    confirm_policy: ConfirmPolicy,
}

impl ConsumerEngine {
    pub fn new(
        config: IngestConfig,
        topics: Arc<TopicService>,
        backends: Arc<SpanBackends>,
        enricher: Arc<MetadataEnricher>,
        metrics: IngestMetrics,
    ) -> Self {
        Self {
            config,
            topics,
            backends,
            enricher,
            metrics,
            stats: Arc::new(ConsumerStats::default()),
            error_handler: Arc::new(LogAndContinue),
            confirm_policy: ConfirmPolicy::default(),
        }
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn WriteErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_confirm_policy(mut self, policy: ConfirmPolicy) -> Self {
        self.confirm_policy = policy;
        self
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Run every worker until shutdown
    ///
    /// Returns the first fatal worker error as soon as it happens. The other
    /// workers keep running until the shutdown signal, so the caller should
    /// trigger it on error.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) -> Result<(), IngestError> {
        let engine = Arc::new(self);
        let mut workers = JoinSet::new();

        for topic in &engine.config.topics {
            for n in 0..engine.config.parallelism.max(1) {
                let engine = Arc::clone(&engine);
                let topic = topic.clone();
                let shutdown_rx = shutdown_rx.clone();
                workers.spawn(async move { engine.run_worker(topic, n, shutdown_rx).await });
            }
        }

        tracing::debug!(
            topics = engine.config.topics.len(),
            parallelism = engine.config.parallelism,
            group = %engine.config.group,
            "Ingest consumers started"
        );

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    workers.detach_all();
                    return Err(e);
                }
                Err(e) => tracing::error!(error = %e, "Ingest worker panicked"),
            }
        }

        tracing::debug!(stats = ?engine.stats.snapshot(), "Ingest consumers stopped");
        Ok(())
    }

    async fn run_worker(
        &self,
        topic: TopicConfig,
        n: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), IngestError> {
        let consumer = format!("{}:{}:{}", Uuid::new_v4(), std::process::id(), n);
        let reader = self
            .topics
            .topic(&topic.name)
            .subscribe(&self.config.group, &consumer)
            .await
            .map_err(IngestError::Read)?;
        let confirmer = reader.confirmer();
        let writer = self.backends.writer().await?;

        tracing::debug!(
            topic = %topic.name,
            format = %topic.format,
            consumer = %consumer,
            "Ingest worker started"
        );

        let (tx, rx) = mpsc::channel(self.config.buffer_size.max(1));
        let decoder = decoder_for(topic.format);
        let read_stage = self.read_stage(&topic.name, reader, decoder.as_ref(), tx, shutdown_rx);
        let write_stage = self.write_stage(&topic.name, writer, confirmer, rx);
        let ((), result) = tokio::join!(read_stage, write_stage);

        tracing::debug!(topic = %topic.name, consumer = %consumer, "Ingest worker stopped");
        result
    }

    async fn read_stage(
        &self,
        topic: &str,
        mut reader: TopicReader,
        decoder: &dyn SpanDecoder,
        tx: mpsc::Sender<Batch>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let timeout = Duration::from_millis(self.config.read_timeout_ms.max(1));
        let claim_interval = Duration::from_secs(INGEST_CLAIM_INTERVAL_SECS);
        let mut last_claim = Instant::now();

        while !*shutdown_rx.borrow() && !tx.is_closed() {
            let mut records = Vec::new();
            if last_claim.elapsed() >= claim_interval {
                last_claim = Instant::now();
                match reader
                    .claim_stale(INGEST_CLAIM_MIN_IDLE_MS, self.config.batch_size)
                    .await
                {
                    Ok(claimed) if !claimed.is_empty() => {
                        tracing::debug!(topic, count = claimed.len(), "Claimed stale records");
                        records = claimed;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, topic, "Failed to claim stale records"),
                }
            }

            let (stop, read_error) = self
                .read_batch(&mut reader, &mut records, timeout, &mut shutdown_rx)
                .await;

            if !records.is_empty() {
                add(&self.stats.read, records.len());
                let batch = self.process(topic, decoder, records).await;
                if tx.send(batch).await.is_err() {
                    // Writer stage stopped
                    break;
                }
            }

            match read_error {
                Some(TopicError::ChannelClosed) => break,
                Some(e) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    self.metrics.read_errors.inc();
                    tracing::warn!(error = %e, topic, "Failed to read span records");
                    tokio::time::sleep(Duration::from_millis(INGEST_READ_ERROR_BACKOFF_MS)).await;
                }
                None => {}
            }
            if stop {
                break;
            }
        }
    }

    /// Fill `records` up to the batch size or until the read timeout
    ///
    /// Returns whether shutdown was signalled and the read error that ended
    /// the batch early, if any.
    async fn read_batch(
        &self,
        reader: &mut TopicReader,
        records: &mut Vec<TopicRecord>,
        timeout: Duration,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> (bool, Option<TopicError>) {
        let deadline = tokio::time::Instant::now() + timeout;
        while records.len() < self.config.batch_size.max(1) {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return (true, None);
                    }
                }
                received = tokio::time::timeout_at(deadline, reader.recv()) => match received {
                    Ok(Ok(record)) => records.push(record),
                    Ok(Err(e)) => return (false, Some(e)),
                    Err(_elapsed) => break,
                },
            }
        }
        (false, None)
    }

    async fn process(
        &self,
        topic: &str,
        decoder: &dyn SpanDecoder,
        records: Vec<TopicRecord>,
    ) -> Batch {
        let mut batch = Batch {
            ids: Vec::with_capacity(records.len()),
            spans: Vec::with_capacity(records.len()),
        };

        for record in records {
            batch.ids.push(record.id);
            let mut span = match decoder.decode(
                record.key.as_deref(),
                &record.payload,
                topic,
                record.timestamp_ms,
            ) {
                Ok(span) => span,
                Err(e) => {
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_span_failure(FailureStage::Decode, None);
                    tracing::debug!(error = %e, topic, "Dropping undecodable span record");
                    continue;
                }
            };
            if let Err(e) = validate(&span) {
                self.stats.validate_errors.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .record_span_failure(FailureStage::Validate, Some(&span));
                tracing::debug!(error = %e, topic, "Dropping invalid span");
                continue;
            }
            if !self.enricher.enrich(&mut span).await {
                self.stats.metadata_errors.fetch_add(1, Ordering::Relaxed);
            }
            self.stats.decoded.fetch_add(1, Ordering::Relaxed);
            batch.spans.push(span);
        }
        batch
    }

    async fn write_stage(
        &self,
        topic: &str,
        mut writer: impl SpanWriter,
        confirmer: TopicConfirmer,
        mut rx: mpsc::Receiver<Batch>,
    ) -> Result<(), IngestError> {
        let result = self.drain(topic, &mut writer, &confirmer, &mut rx).await;
        if let Err(e) = writer.close().await {
            tracing::warn!(error = %e, topic, "Failed to close span writer");
        }
        result
    }

    async fn drain(
        &self,
        topic: &str,
        writer: &mut impl SpanWriter,
        confirmer: &TopicConfirmer,
        rx: &mut mpsc::Receiver<Batch>,
    ) -> Result<(), IngestError> {
        while let Some(batch) = rx.recv().await {
            let count = batch.spans.len();
            if count > 0 {
                let stored = match writer.write_batch(batch.spans).await {
                    Ok(_) => writer.flush().await,
                    Err(e) => Err(e),
                };
                match stored {
                    Ok(()) => {
                        add(&self.stats.written, count);
                        self.metrics
                            .spans_written
                            .with_label_values(&[topic])
                            .inc_by(count as u64);
                    }
                    Err(e) => {
                        self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        self.metrics.write_errors.with_label_values(&[topic]).inc();
                        let failure = WriteFailure {
                            topic,
                            spans: count,
                            error: &e,
                        };
                        if self.error_handler.handle(&failure) == WriteDecision::Abort {
                            return Err(IngestError::Write(e));
                        }
                    }
                }
            }

            match confirmer.confirm(&batch.ids).await {
                Ok(()) => add(&self.stats.confirmed, batch.ids.len()),
                Err(e) => {
                    self.metrics.confirm_errors.inc();
                    match self.confirm_policy {
                        ConfirmPolicy::Escalate => {
                            return Err(IngestError::Confirm {
                                topic: topic.to_string(),
                                source: e,
                            });
                        }
                        ConfirmPolicy::Ignore => {
                            tracing::warn!(error = %e, topic, records = batch.ids.len(), "Failed to confirm span records");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
