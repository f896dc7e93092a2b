//! Query layer errors

use thiserror::Error;

use crate::data::StorageError;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    /// Invalid filter combination, surfaced to the caller as-is
    #[error("invalid parameter {name}: {reason}")]
    Parameter { name: &'static str, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metrics query failed: {0}")]
    MetricQuery(String),

    #[error("metrics query endpoint not configured")]
    MetricQueryDisabled,
}

impl QueryError {
    pub fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Parameter {
            name,
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        Self::MetricQuery(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = QueryError::parameter("duration", "max must be greater than min");
        assert_eq!(
            e.to_string(),
            "invalid parameter duration: max must be greater than min"
        );
    }
}
