//! Span storage traits
//!
//! Every span backend (Cassandra, ClickHouse, Elasticsearch) implements
//! `SpanStorage`. The query layer fans out over the enabled backends and the
//! ingest pipeline writes through per-worker `SpanWriter`s.

use async_trait::async_trait;

use super::error::StorageError;
use crate::domain::span::Span;

/// Placement hint narrowing where a backend looks for a trace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hint {
    pub scope: Option<String>,
    /// Approximate trace time, unix milliseconds
    pub timestamp_ms: Option<i64>,
}

/// Which spans an iterator walks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub trace_id: String,
    pub hint: Hint,
}

impl Selector {
    pub fn trace(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            hint: Hint::default(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.hint.scope = Some(scope.into());
        self
    }
}

#[async_trait]
pub trait SpanStorage: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Open a writer; it must be closed to flush buffered spans
    async fn new_writer(&self) -> Result<Box<dyn SpanWriter>, StorageError>;

    /// Bidirectional cursor over the spans of one trace
    async fn iterator(&self, selector: &Selector) -> Result<Box<dyn SpanIterator>, StorageError>;

    /// Number of spans stored for a trace
    async fn count(&self, trace_id: &str) -> Result<i64, StorageError>;

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Stop handing out writers; writers already open keep working
    fn close(&self) {}
}

/// Buffered span writer owned by a single ingest worker
#[async_trait]
pub trait SpanWriter: Send {
    async fn write(&mut self, span: Span) -> Result<(), StorageError>;

    /// Buffer a batch, returning how many spans were accepted
    async fn write_batch(&mut self, spans: Vec<Span>) -> Result<usize, StorageError> {
        let n = spans.len();
        for span in spans {
            self.write(span).await?;
        }
        Ok(n)
    }

    /// Push buffered spans to the backend
    async fn flush(&mut self) -> Result<(), StorageError>;

    /// Flush and release the writer
    async fn close(&mut self) -> Result<(), StorageError>;
}

/// Cursor over the spans of a trace ordered by `(start_time, span_id)`
///
/// The first movement fixes the direction: `first`/`next` walk forward,
/// `last`/`prev` walk backward. Moving the other way afterwards fails with
/// `StorageError::OpNotSupported`. Each movement returns `Ok(false)` once the
/// cursor is exhausted.
#[async_trait]
pub trait SpanIterator: Send {
    async fn first(&mut self) -> Result<bool, StorageError>;
    async fn last(&mut self) -> Result<bool, StorageError>;
    async fn next(&mut self) -> Result<bool, StorageError>;
    async fn prev(&mut self) -> Result<bool, StorageError>;

    /// Span under the cursor after a successful movement
    fn value(&self) -> Option<&Span>;

    async fn close(&mut self);
}
