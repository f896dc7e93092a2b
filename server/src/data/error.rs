//! Unified error type for span storage
//!
//! Wraps errors from every span backend (Cassandra, ClickHouse,
//! Elasticsearch) while preserving which backend produced them.

use thiserror::Error;

use super::clickhouse::ClickhouseError;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Cursor moved against its locked direction
    #[error("operation not supported")]
    OpNotSupported,

    /// Writer or iterator used after close
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Cassandra driver error
    #[error("Cassandra error: {0}")]
    Cassandra(String),

    /// ClickHouse error
    #[error("ClickHouse error: {0}")]
    Clickhouse(#[from] ClickhouseError),

    /// Elasticsearch rejected a request
    #[error("Elasticsearch error ({status}): {reason}")]
    Elasticsearch { status: u16, reason: String },

    /// HTTP transport error (Elasticsearch)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Submission refused because the process is shutting down
    #[error("{backend} is shutting down")]
    ShuttingDown { backend: &'static str },

    #[error("Query timeout after {timeout_secs}s on {backend}")]
    Timeout {
        backend: &'static str,
        timeout_secs: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn cassandra(e: impl std::fmt::Display) -> Self {
        Self::Cassandra(e.to_string())
    }

    pub fn timeout(backend: &'static str, timeout_secs: u64) -> Self {
        Self::Timeout {
            backend,
            timeout_secs,
        }
    }

    /// Connection-level errors worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Elasticsearch { status, .. } => *status == 429 || *status >= 500,
            Self::Cassandra(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout") || msg.contains("connection") || msg.contains("unavailable")
            }
            Self::Clickhouse(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Backend that produced this error
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Cassandra(_) => "cassandra",
            Self::Clickhouse(_) => "clickhouse",
            Self::Elasticsearch { .. } | Self::Http(_) => "elasticsearch",
            Self::ShuttingDown { backend } | Self::Timeout { backend, .. } => backend,
            Self::OpNotSupported
            | Self::Closed(_)
            | Self::Serialization(_)
            | Self::Config(_) => "unknown",
        }
    }
}
