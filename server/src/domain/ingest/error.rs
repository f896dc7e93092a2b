//! Ingest pipeline errors

use thiserror::Error;

use crate::data::StorageError;
use crate::data::topics::TopicError;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Malformed wire payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Required identity fields missing
    #[error("validate error: {0}")]
    Validate(String),

    /// Best-effort enrichment failure
    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("read error: {0}")]
    Read(TopicError),

    #[error("write error: {0}")]
    Write(#[from] StorageError),

    /// Offsets could not be committed after a successful write
    #[error("confirm error on topic {topic}: {source}")]
    Confirm { topic: String, source: TopicError },

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn validate(msg: impl Into<String>) -> Self {
        Self::Validate(msg.into())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            IngestError::decode("bad json").to_string(),
            "decode error: bad json"
        );
        let err = IngestError::Confirm {
            topic: "spans".into(),
            source: TopicError::ChannelClosed,
        };
        assert_eq!(err.to_string(), "confirm error on topic spans: channel closed");
    }
}
