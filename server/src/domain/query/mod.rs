//! Trace queries
//!
//! - `engine` - Span fan-out over the enabled backends and span counts
//! - `tree` - Trace tree reconstruction and derived timings
//! - `traces` - Trace search statements for the metrics store
//! - `metric` - Metrics store client

pub mod engine;
pub mod error;
pub mod metric;
pub mod traces;
pub mod tree;

pub use engine::QueryEngine;
pub use error::QueryError;
pub use metric::{DisabledMetricQuery, HttpMetricQuery, MetricQuery};
pub use traces::{
    QueryCondition, TraceQuery, TraceQueryConditions, TraceSort, TraceStatement, TraceStatus,
    TraceSummary,
};
pub use tree::{SpanTree, SpanView, TraceSpans};
