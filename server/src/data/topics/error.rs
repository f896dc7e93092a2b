//! Topic error types

use std::fmt;

/// Error type for topic operations
#[derive(Debug)]
pub enum TopicError {
    /// Subscription or connection closed
    ChannelClosed,
    /// Connection error (Redis)
    Connection(String),
    /// Malformed record
    Serialization(String),
    /// Stream command failed
    Stream(String),
    /// Consumer group missing or could not be created
    ConsumerGroup(String),
    /// Configuration error
    Config(String),
}

impl std::error::Error for TopicError {}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicError::ChannelClosed => write!(f, "channel closed"),
            TopicError::Connection(msg) => write!(f, "connection error: {}", msg),
            TopicError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            TopicError::Stream(msg) => write!(f, "stream error: {}", msg),
            TopicError::ConsumerGroup(msg) => write!(f, "consumer group error: {}", msg),
            TopicError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl From<deadpool_redis::PoolError> for TopicError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        TopicError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for TopicError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        TopicError::Stream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(TopicError::ChannelClosed.to_string(), "channel closed");
        assert_eq!(
            TopicError::ConsumerGroup("spans".into()).to_string(),
            "consumer group error: spans"
        );
    }
}
