//! Span topics
//!
//! At-least-once record delivery with pluggable backends:
//! - In-memory (default) - local-only, for development and single-process
//! - Redis Streams - distributed, for multi-machine deployments
//!
//! Producers append raw span payloads; the ingest pipeline reads them
//! through consumer groups and confirms each batch after it is stored.

mod backend;
mod error;
mod memory;
mod redis;

use std::sync::Arc;

use futures::StreamExt;

pub use backend::{TopicBackend, TopicRecord, TopicStats, TopicSubscription};
pub use error::TopicError;
pub use memory::MemoryTopicBackend;

use crate::core::config::{BusBackendType, BusConfig};

/// Central topic service
pub struct TopicService {
    backend: Arc<dyn TopicBackend>,
}

impl Default for TopicService {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicService {
    /// In-memory topic service
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryTopicBackend::new()))
    }

    pub fn with_backend(backend: Arc<dyn TopicBackend>) -> Self {
        Self { backend }
    }

    /// Create from bus configuration
    pub async fn from_config(config: &BusConfig) -> Result<Self, TopicError> {
        let backend: Arc<dyn TopicBackend> = match config.backend {
            BusBackendType::Memory => Arc::new(MemoryTopicBackend::new()),
            BusBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    TopicError::Config("redis_url required for Redis bus backend".into())
                })?;
                Arc::new(redis::RedisTopicBackend::new(url).await?)
            }
        };
        Ok(Self { backend })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub async fn health_check(&self) -> Result<(), TopicError> {
        self.backend.health_check().await
    }

    /// Handle for a named topic
    pub fn topic(&self, name: &str) -> Topic {
        Topic {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
        }
    }
}

/// Handle to a single topic
#[derive(Clone)]
pub struct Topic {
    name: String,
    backend: Arc<dyn TopicBackend>,
}

impl Topic {
    /// Append a record, returning its id
    pub async fn publish(&self, key: Option<&[u8]>, payload: &[u8]) -> Result<String, TopicError> {
        self.backend.publish(&self.name, key, payload).await
    }

    /// Join a consumer group
    pub async fn subscribe(&self, group: &str, consumer: &str) -> Result<TopicReader, TopicError> {
        let subscription = self.backend.subscribe(&self.name, group, consumer).await?;
        Ok(TopicReader {
            confirmer: TopicConfirmer {
                name: self.name.clone(),
                group: group.to_string(),
                backend: Arc::clone(&self.backend),
            },
            consumer: consumer.to_string(),
            subscription,
        })
    }

    pub async fn stats(&self, group: &str) -> Result<TopicStats, TopicError> {
        self.backend.stats(&self.name, group).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Confirms processed records (Send + Sync, cloneable)
#[derive(Clone)]
pub struct TopicConfirmer {
    name: String,
    group: String,
    backend: Arc<dyn TopicBackend>,
}

impl TopicConfirmer {
    pub async fn confirm(&self, ids: &[String]) -> Result<(), TopicError> {
        self.backend.confirm(&self.name, &self.group, ids).await
    }
}

/// Consumer-group member reading a topic
pub struct TopicReader {
    confirmer: TopicConfirmer,
    consumer: String,
    subscription: TopicSubscription,
}

impl TopicReader {
    /// Receive the next record
    pub async fn recv(&mut self) -> Result<TopicRecord, TopicError> {
        match self.subscription.receiver.next().await {
            Some(result) => result,
            None => Err(TopicError::ChannelClosed),
        }
    }

    /// Take over records other members left pending for at least `min_idle_ms`
    pub async fn claim_stale(
        &mut self,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<TopicRecord>, TopicError> {
        let c = &self.confirmer;
        c.backend
            .claim(&c.name, &c.group, &self.consumer, min_idle_ms, count)
            .await
    }

    pub fn confirmer(&self) -> TopicConfirmer {
        self.confirmer.clone()
    }

    pub fn topic(&self) -> &str {
        &self.confirmer.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topic_roundtrip_through_service() {
        let service = TopicService::new();
        let topic = service.topic("spans");
        let mut reader = topic.subscribe("ingest", "c1").await.unwrap();

        topic.publish(None, b"{\"a\":1}").await.unwrap();
        let record = reader.recv().await.unwrap();
        assert_eq!(record.payload, b"{\"a\":1}");
        assert_eq!(reader.topic(), "spans");

        reader.confirmer().confirm(&[record.id]).await.unwrap();
        let stats = topic.stats("ingest").await.unwrap();
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_claim_stale_through_reader() {
        let service = TopicService::new();
        let topic = service.topic("spans");
        topic.publish(None, b"x").await.unwrap();

        let mut dead = topic.subscribe("ingest", "dead").await.unwrap();
        dead.recv().await.unwrap();

        let mut alive = topic.subscribe("ingest", "alive").await.unwrap();
        let claimed = alive.claim_stale(0, 16).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn test_backend_name() {
        assert_eq!(TopicService::new().backend_name(), "memory");
    }
}
