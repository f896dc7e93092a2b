//! Span ingest pipeline
//!
//! Consumes span records from the configured topics, decodes them into
//! canonical spans, fills scope metadata and writes them to every enabled
//! span backend.

pub mod consumer;
pub mod decode;
pub mod enrich;
pub mod error;
pub mod metrics;

pub use consumer::{
    ConfirmPolicy, ConsumerEngine, ConsumerStats, ConsumerStatsSnapshot, LogAndContinue,
    WriteDecision, WriteErrorHandler, WriteFailure,
};
pub use decode::SpanFormat;
pub use enrich::{MetadataEnricher, MetadataSource, ScopeMetadata, StaticMetadataSource};
pub use error::IngestError;
pub use metrics::IngestMetrics;
