//! In-memory span storage
//!
//! Local-only backend for development and single-process deployments.
//! Spans are keyed by trace and deduplicated by span id on flush.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::cursor::{PagedIterator, VecPageSource};
use super::error::StorageError;
use super::traits::{Selector, SpanIterator, SpanStorage, SpanWriter};
use crate::domain::span::Span;

const PAGE_SIZE: usize = 256;

type Traces = Arc<RwLock<HashMap<String, HashMap<String, Span>>>>;

#[derive(Clone, Default)]
pub struct MemorySpanStorage {
    traces: Traces,
}

impl MemorySpanStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of traces held
    pub fn trace_count(&self) -> usize {
        self.traces.read().len()
    }
}

#[async_trait]
impl SpanStorage for MemorySpanStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn new_writer(&self) -> Result<Box<dyn SpanWriter>, StorageError> {
        Ok(Box::new(MemorySpanWriter {
            traces: Arc::clone(&self.traces),
            buffer: Vec::new(),
            closed: false,
        }))
    }

    async fn iterator(&self, selector: &Selector) -> Result<Box<dyn SpanIterator>, StorageError> {
        let snapshot: Vec<Span> = self
            .traces
            .read()
            .get(&selector.trace_id)
            .map(|spans| spans.values().cloned().collect())
            .unwrap_or_default();
        Ok(Box::new(PagedIterator::new(
            VecPageSource::new(snapshot),
            PAGE_SIZE,
        )))
    }

    async fn count(&self, trace_id: &str) -> Result<i64, StorageError> {
        Ok(self
            .traces
            .read()
            .get(trace_id)
            .map_or(0, |spans| spans.len() as i64))
    }
}

struct MemorySpanWriter {
    traces: Traces,
    buffer: Vec<Span>,
    closed: bool,
}

#[async_trait]
impl SpanWriter for MemorySpanWriter {
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
        let mut traces = self.traces.write();
        for span in self.buffer.drain(..) {
            traces
                .entry(span.trace_id.clone())
                .or_default()
                .insert(span.span_id.clone(), span);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.flush().await?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace: &str, id: &str, start: i64) -> Span {
        Span {
            trace_id: trace.into(),
            span_id: id.into(),
            start_time: start,
            end_time: start + 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_spans_visible_only_after_flush() {
        let storage = MemorySpanStorage::new();
        let mut writer = storage.new_writer().await.unwrap();
        writer.write(span("t1", "a", 10)).await.unwrap();
        assert_eq!(storage.count("t1").await.unwrap(), 0);

        writer.flush().await.unwrap();
        assert_eq!(storage.count("t1").await.unwrap(), 1);
        assert_eq!(storage.count("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_iterator_orders_by_start_time() {
        let storage = MemorySpanStorage::new();
        let mut writer = storage.new_writer().await.unwrap();
        writer
            .write_batch(vec![span("t1", "b", 20), span("t1", "a", 10), span("t2", "c", 5)])
            .await
            .unwrap();
        writer.close().await.unwrap();

        let mut it = storage.iterator(&Selector::trace("t1")).await.unwrap();
        let mut ids = Vec::new();
        while it.next().await.unwrap() {
            ids.push(it.value().unwrap().span_id.clone());
        }
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_duplicate_span_ids_collapse() {
        let storage = MemorySpanStorage::new();
        let mut writer = storage.new_writer().await.unwrap();
        writer.write(span("t1", "a", 10)).await.unwrap();
        writer.write(span("t1", "a", 12)).await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(storage.count("t1").await.unwrap(), 1);

        assert!(matches!(
            writer.write(span("t1", "b", 1)).await,
            Err(StorageError::Closed(_))
        ));
    }
}
