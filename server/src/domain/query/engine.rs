//! Fan-out query engine over the enabled span backends

use std::collections::HashMap;
use std::sync::Arc;

use super::error::QueryError;
use super::metric::MetricQuery;
use super::traces::{
    TraceQuery, TraceQueryConditions, TraceSummary, trace_count, trace_query_conditions,
    trace_summary,
};
use super::tree::{SpanTree, TraceSpans};
use crate::core::constants::MAX_SPAN_LIMIT;
use crate::data::{Selector, SpanStorage, StorageError};
use crate::domain::span::Span;
use crate::utils::time::now_millis;

pub struct QueryEngine {
    backends: Vec<Arc<dyn SpanStorage>>,
    metrics: Arc<dyn MetricQuery>,
}

impl QueryEngine {
    /// `backends` must hold only the enabled backends; nothing else is queried
    pub fn new(backends: Vec<Arc<dyn SpanStorage>>, metrics: Arc<dyn MetricQuery>) -> Self {
        Self { backends, metrics }
    }

    /// Merge the spans of a trace from every backend and derive the tree
    ///
    /// A failing backend is skipped. A trace with no spans yields an empty
    /// result, not an error.
    pub async fn get_spans(
        &self,
        trace_id: &str,
        scope_id: &str,
        limit: i64,
    ) -> Result<TraceSpans, QueryError> {
        if trace_id.is_empty() {
            return Err(QueryError::MissingParameter("trace_id"));
        }
        if scope_id.is_empty() {
            return Err(QueryError::MissingParameter("scope_id"));
        }
        let limit = if limit <= 0 || limit > MAX_SPAN_LIMIT {
            MAX_SPAN_LIMIT
        } else {
            limit
        } as usize;

        let selector = Selector::trace(trace_id).with_scope(scope_id);
        let mut merged: HashMap<String, Span> = HashMap::new();
        for backend in &self.backends {
            match collect(backend.as_ref(), &selector, limit).await {
                Ok(spans) => {
                    for span in spans {
                        merged.insert(span.span_id.clone(), span);
                    }
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    backend = backend.name(),
                    trace_id,
                    "Failed to read spans, skipping backend"
                ),
            }
        }

        let mut spans: Vec<Span> = merged.into_values().collect();
        spans.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.span_id.cmp(&b.span_id))
        });
        spans.truncate(limit);

        Ok(SpanTree::new(spans).into_trace_spans())
    }

    /// Span count summed over the enabled backends
    pub async fn get_span_count(&self, trace_id: &str) -> i64 {
        let mut total = 0i64;
        for backend in &self.backends {
            match backend.count(trace_id).await {
                Ok(n) => total = total.saturating_add(n),
                Err(e) => tracing::warn!(
                    error = %e,
                    backend = backend.name(),
                    trace_id,
                    "Failed to count spans"
                ),
            }
        }
        total
    }

    pub async fn get_traces(&self, query: TraceQuery) -> Result<Vec<TraceSummary>, QueryError> {
        let statement = query.normalize(now_millis())?.statement();
        tracing::debug!(statement = %statement.statement, "Querying traces");
        let rows = self.metrics.query(&statement).await?;
        Ok(rows.iter().map(|row| trace_summary(row)).collect())
    }

    pub async fn get_traces_count(&self, query: TraceQuery) -> Result<i64, QueryError> {
        let statement = query.normalize(now_millis())?.count_statement();
        let rows = self.metrics.query(&statement).await?;
        Ok(trace_count(&rows))
    }

    pub fn trace_query_conditions(&self) -> TraceQueryConditions {
        trace_query_conditions()
    }
}

/// Walk a backend's cursor forward, at most `limit` spans
async fn collect(
    backend: &dyn SpanStorage,
    selector: &Selector,
    limit: usize,
) -> Result<Vec<Span>, StorageError> {
    let mut iter = backend.iterator(selector).await?;
    let mut spans = Vec::new();
    let mut result = Ok(());

    let mut more = iter.first().await;
    while spans.len() < limit {
        match more {
            Ok(true) => {
                if let Some(span) = iter.value() {
                    spans.push(span.clone());
                }
            }
            Ok(false) => break,
            Err(e) => {
                result = Err(e);
                break;
            }
        }
        more = iter.next().await;
    }
    iter.close().await;

    result.map(|()| spans)
}
