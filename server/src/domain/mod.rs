//! Domain logic for span ingestion and trace queries
//!
//! - `span` - Canonical span model
//! - `ingest` - Topic consumers decoding, enriching and storing spans
//! - `query` - Trace tree reconstruction and trace search
//! - `debug` - Debug request replay and status tracking

pub mod debug;
pub mod ingest;
pub mod query;
pub mod span;

pub use debug::DebugService;
pub use ingest::ConsumerEngine;
pub use query::QueryEngine;
pub use span::Span;
