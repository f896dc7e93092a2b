//! Fan-out writer over every enabled span backend

use std::sync::Arc;

use async_trait::async_trait;

use super::error::StorageError;
use super::traits::{SpanStorage, SpanWriter};
use crate::domain::span::Span;

/// Writes each span to every backend
///
/// Backends are independent: a failure in one never blocks the others, and
/// a flush is not atomic across them. The first error is returned after all
/// backends have been attempted.
pub struct MultiWriter {
    writers: Vec<(&'static str, Box<dyn SpanWriter>)>,
}

impl MultiWriter {
    pub async fn open(backends: &[Arc<dyn SpanStorage>]) -> Result<Self, StorageError> {
        let mut writers = Vec::with_capacity(backends.len());
        for backend in backends {
            writers.push((backend.name(), backend.new_writer().await?));
        }
        Ok(Self { writers })
    }
}

fn keep_first(first: &mut Option<StorageError>, backend: &str, op: &str, e: StorageError) {
    tracing::warn!(backend, op, error = %e, "Span backend write failed");
    if first.is_none() {
        *first = Some(e);
    }
}

#[async_trait]
impl SpanWriter for MultiWriter {
    async fn write(&mut self, span: Span) -> Result<(), StorageError> {
        let mut first = None;
        let last = self.writers.len().saturating_sub(1);
        let mut span = Some(span);
        for (i, (name, writer)) in self.writers.iter_mut().enumerate() {
            let item = if i == last {
                span.take()
            } else {
                span.clone()
            };
            let Some(item) = item else { break };
            if let Err(e) = writer.write(item).await {
                keep_first(&mut first, name, "write", e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    async fn write_batch(&mut self, spans: Vec<Span>) -> Result<usize, StorageError> {
        let n = spans.len();
        let mut first = None;
        for (name, writer) in self.writers.iter_mut() {
            if let Err(e) = writer.write_batch(spans.clone()).await {
                keep_first(&mut first, name, "write", e);
            }
        }
        first.map_or(Ok(n), Err)
    }

    async fn flush(&mut self) -> Result<(), StorageError> {
        let mut first = None;
        for (name, writer) in self.writers.iter_mut() {
            if let Err(e) = writer.flush().await {
                keep_first(&mut first, name, "flush", e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        let mut first = None;
        for (name, writer) in self.writers.iter_mut() {
            if let Err(e) = writer.close().await {
                keep_first(&mut first, name, "close", e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
