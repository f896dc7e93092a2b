//! Trace tree reconstruction
//!
//! Spans are merged into a map keyed by span id; parent links are resolved
//! through that map only. Parents that were never stored simply end the walk.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::span::Span;

/// A span with its derived timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SpanView {
    #[serde(flatten)]
    pub span: Span,
    /// Number of spans on the path to the root, this one included.
    /// `None` when the parent chain loops.
    pub depth: Option<u32>,
    pub duration: i64,
    pub self_duration: i64,
}

/// Reconstructed trace returned by span queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct TraceSpans {
    pub spans: Vec<SpanView>,
    pub service_count: usize,
    pub depth: u32,
    pub duration: i64,
    pub span_count: usize,
}

/// Spans of one trace keyed by span id
#[derive(Debug, Default)]
pub struct SpanTree {
    spans: HashMap<String, Span>,
}

impl SpanTree {
    /// Build from spans already merged and truncated by the caller
    ///
    /// Self-parenting spans are rewritten as roots.
    pub fn new(spans: impl IntoIterator<Item = Span>) -> Self {
        let spans = spans
            .into_iter()
            .map(|mut span| {
                if span.parent_span_id == span.span_id {
                    span.parent_span_id.clear();
                }
                (span.span_id.clone(), span)
            })
            .collect();
        Self { spans }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, span_id: &str) -> Option<&Span> {
        self.spans.get(span_id)
    }

    /// Depth of a span, `None` if its ancestry loops
    pub fn depth(&self, span: &Span) -> Option<u32> {
        let mut visited = HashSet::new();
        visited.insert(span.span_id.as_str());
        let mut depth = 1u32;
        let mut current = span;

        while let Some(parent) = current.parent_id().and_then(|id| self.spans.get(id)) {
            if !visited.insert(parent.span_id.as_str()) {
                tracing::warn!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    "Span parent chain contains a cycle"
                );
                return None;
            }
            depth = depth.saturating_add(1);
            current = parent;
        }
        Some(depth)
    }

    /// Sum of `end - start` over the direct children of `span_id`
    pub fn children_duration(&self, span_id: &str) -> i64 {
        self.spans
            .values()
            .filter(|s| s.parent_id() == Some(span_id))
            .fold(0i64, |acc, s| {
                acc.saturating_add(s.end_time.saturating_sub(s.start_time))
            })
    }

    /// Derive per-span and trace-level metrics
    pub fn into_trace_spans(self) -> TraceSpans {
        if self.spans.is_empty() {
            return TraceSpans::default();
        }

        let mut services = HashSet::new();
        let mut depth = 1;
        let mut min_start = i64::MAX;
        let mut max_end = i64::MIN;
        let mut views = Vec::with_capacity(self.spans.len());

        for span in self.spans.values() {
            services.insert(span.service_name());
            let span_depth = self.depth(span);
            if let Some(d) = span_depth {
                depth = depth.max(d);
            }
            min_start = min_start.min(span.start_time);
            max_end = max_end.max(span.end_time);

            let duration = span.duration();
            let self_duration = duration
                .saturating_sub(self.children_duration(&span.span_id))
                .saturating_abs();
            views.push(SpanView {
                span: span.clone(),
                depth: span_depth,
                duration,
                self_duration,
            });
        }

        views.sort_by(|a, b| {
            a.span
                .start_time
                .cmp(&b.span.start_time)
                .then_with(|| a.span.span_id.cmp(&b.span.span_id))
        });

        TraceSpans {
            span_count: views.len(),
            service_count: services.len(),
            depth,
            duration: max_end.saturating_sub(min_start).saturating_abs(),
            spans: views,
        }
    }
}
