//! Debug request errors

use thiserror::Error;

use crate::data::sqlite::SqliteError;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("debug request {request_id} not found in scope {scope_id}")]
    NotFound { scope_id: String, request_id: String },

    #[error("database error: {0}")]
    Database(#[from] SqliteError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Client(String),
}

impl DebugError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub fn not_found(scope_id: &str, request_id: &str) -> Self {
        Self::NotFound {
            scope_id: scope_id.to_string(),
            request_id: request_id.to_string(),
        }
    }
}
