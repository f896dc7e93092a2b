//! Prometheus metrics for the ingest pipeline

use std::sync::Arc;

use prometheus::{
    IntCounter, IntCounterVec, Registry, TextEncoder, register_int_counter_vec_with_registry,
    register_int_counter_with_registry,
};

use crate::domain::span::Span;

/// Labels attached to per-record failure counters
pub const SPAN_ERROR_LABELS: [&str; 6] = [
    "stage",
    "span_kind",
    "span_layer",
    "org_name",
    "cluster_name",
    "scope",
];

/// Pipeline metrics registered on a dedicated registry
#[derive(Debug, Clone)]
pub struct IngestMetrics {
    registry: Arc<Registry>,
    pub span_errors: IntCounterVec,
    pub metadata_errors: IntCounterVec,
    pub spans_written: IntCounterVec,
    pub write_errors: IntCounterVec,
    pub read_errors: IntCounter,
    pub confirm_errors: IntCounter,
}

/// Decode/validate failure stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Decode,
    Validate,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Decode => "decode",
            FailureStage::Validate => "validate",
        }
    }
}

impl IngestMetrics {
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            span_errors: register_int_counter_vec_with_registry!(
                "tracehouse_ingest_span_errors_total",
                "Span records rejected by the decoder or validator",
                &SPAN_ERROR_LABELS,
                registry
            )?,
            metadata_errors: register_int_counter_vec_with_registry!(
                "tracehouse_ingest_metadata_errors_total",
                "Best-effort metadata enrichment failures",
                &["reason"],
                registry
            )?,
            spans_written: register_int_counter_vec_with_registry!(
                "tracehouse_ingest_spans_written_total",
                "Spans handed to a storage writer",
                &["topic"],
                registry
            )?,
            write_errors: register_int_counter_vec_with_registry!(
                "tracehouse_ingest_write_errors_total",
                "Batches that failed to write",
                &["topic"],
                registry
            )?,
            read_errors: register_int_counter_with_registry!(
                "tracehouse_ingest_read_errors_total",
                "Errors reading from the span topics",
                registry
            )?,
            confirm_errors: register_int_counter_with_registry!(
                "tracehouse_ingest_confirm_errors_total",
                "Errors confirming processed records",
                registry
            )?,
            registry,
        })
    }

    #[cfg(test)]
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Self::new(Arc::new(Registry::new()))
    }

    /// Count a rejected record, labelled from whatever tags were recovered
    pub fn record_span_failure(&self, stage: FailureStage, partial: Option<&Span>) {
        let tag = |key: &str| partial.and_then(|s| s.tag(key)).unwrap_or("");
        let scope = partial.and_then(Span::scope).unwrap_or("");
        self.span_errors
            .with_label_values(&[
                stage.as_str(),
                tag("span_kind"),
                tag("span_layer"),
                tag("org_name"),
                tag("cluster_name"),
                scope,
            ])
            .inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_span_failure_labels() {
        let metrics = IngestMetrics::unregistered().unwrap();
        let mut span = Span::default();
        span.tags.insert("org_name".into(), "erda".into());
        span.tags.insert("terminus_key".into(), "tk1".into());

        metrics.record_span_failure(FailureStage::Validate, Some(&span));
        metrics.record_span_failure(FailureStage::Decode, None);

        let validate = metrics
            .span_errors
            .with_label_values(&["validate", "", "", "erda", "", "tk1"])
            .get();
        let decode = metrics
            .span_errors
            .with_label_values(&["decode", "", "", "", "", ""])
            .get();
        assert_eq!(validate, 1);
        assert_eq!(decode, 1);
    }

    #[test]
    fn test_render_contains_counters() {
        let metrics = IngestMetrics::unregistered().unwrap();
        metrics.read_errors.inc();
        let text = metrics.render().unwrap();
        assert!(text.contains("tracehouse_ingest_read_errors_total 1"));
    }
}
