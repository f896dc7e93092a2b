//! ClickHouse error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClickhouseError {
    #[error("Database error: {0}")]
    Database(#[from] clickhouse::error::Error),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    /// A row could not be appended to an open insert; the batch is dropped
    #[error("Append to {table} failed: {error}")]
    Append { table: &'static str, error: String },

    #[error("Batch send failed after {attempts} attempts: {error}")]
    SendExhausted { attempts: u32, error: String },

    #[error("Batch queue closed")]
    QueueClosed,
}

impl ClickhouseError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Database(e) => {
                let msg = e.to_string();
                msg.contains("connection") || msg.contains("timeout") || msg.contains("network")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failed_error_display() {
        let err = ClickhouseError::MigrationFailed {
            version: 2,
            name: "add_spans_meta".to_string(),
            error: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_spans_meta) failed: syntax error"
        );
    }

    #[test]
    fn test_append_error_display() {
        let err = ClickhouseError::Append {
            table: "spans_series",
            error: "buffer closed".to_string(),
        };
        assert_eq!(err.to_string(), "Append to spans_series failed: buffer closed");
    }

    #[test]
    fn test_send_exhausted_display() {
        let err = ClickhouseError::SendExhausted {
            attempts: 3,
            error: "timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Batch send failed after 3 attempts: timeout"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(ClickhouseError::Connection("refused".into()).is_transient());
        assert!(!ClickhouseError::QueueClosed.is_transient());
    }
}
