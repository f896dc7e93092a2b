//! Topic backend trait definition
//!
//! Span topics are consumed with at-least-once semantics: every record is
//! delivered to exactly one consumer of a group and stays pending until the
//! consumer confirms it.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::error::TopicError;

/// Record received from a topic with the id used to confirm it
#[derive(Debug, Clone)]
pub struct TopicRecord {
    /// Backend-assigned record id (Redis stream id or memory sequence)
    pub id: String,
    /// Optional partitioning key supplied by the producer
    pub key: Option<Vec<u8>>,
    /// Raw record payload
    pub payload: Vec<u8>,
    /// Time the record was appended, unix milliseconds
    pub timestamp_ms: i64,
}

/// Live subscription to a topic within a consumer group
pub struct TopicSubscription {
    pub receiver: Pin<Box<dyn Stream<Item = Result<TopicRecord, TopicError>> + Send>>,
}

/// Topic backend trait
///
/// Both the in-memory and the Redis Streams backends implement this trait.
#[async_trait]
pub trait TopicBackend: Send + Sync {
    /// Append a record to a topic, returning its id
    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<String, TopicError>;

    /// Join `group` on `topic` as `consumer`
    ///
    /// Records are distributed across the consumers of a group.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<TopicSubscription, TopicError>;

    /// Confirm a set of records as processed
    async fn confirm(&self, topic: &str, group: &str, ids: &[String]) -> Result<(), TopicError>;

    /// Claim records that have been pending longer than `min_idle_ms`
    ///
    /// Used to recover records owned by consumers that died before confirming.
    async fn claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<TopicRecord>, TopicError>;

    /// Topic statistics for monitoring
    async fn stats(&self, topic: &str, group: &str) -> Result<TopicStats, TopicError>;

    async fn health_check(&self) -> Result<(), TopicError>;

    fn backend_name(&self) -> &'static str;
}

/// Topic statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct TopicStats {
    /// Records retained in the topic
    pub length: u64,
    /// Records delivered but not yet confirmed
    pub pending: u64,
    /// Consumers known to the group
    pub consumers: u64,
    /// Age of the oldest pending record in milliseconds
    pub oldest_pending_ms: Option<u64>,
}
