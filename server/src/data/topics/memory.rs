//! In-memory topic backend
//!
//! Each topic is a bounded VecDeque with simulated consumer groups. A group
//! keeps a single delivery cursor, so the consumers of a group share the
//! records between them the way Kafka partitions or Redis consumer groups do.
//!
//! ## Limitations
//!
//! Suitable for local development and single-process deployments only:
//! records are lost on process exit and groups do not span processes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::backend::{TopicBackend, TopicRecord, TopicStats, TopicSubscription};
use super::error::TopicError;

/// Default topic max length (oldest records are trimmed on publish)
const DEFAULT_TOPIC_MAX_LEN: usize = 100_000;

#[derive(Clone)]
struct Entry {
    id: u64,
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
    timestamp_ms: i64,
}

impl Entry {
    fn to_record(&self) -> TopicRecord {
        TopicRecord {
            id: self.id.to_string(),
            key: self.key.clone(),
            payload: self.payload.clone(),
            timestamp_ms: self.timestamp_ms,
        }
    }
}

#[derive(Default)]
struct GroupState {
    /// Highest record id handed out to any consumer of the group
    cursor: u64,
    /// record id -> (consumer, delivery time)
    pending: HashMap<u64, (String, Instant)>,
    consumers: HashSet<String>,
}

struct TopicState {
    entries: VecDeque<Entry>,
    groups: HashMap<String, GroupState>,
    next_id: u64,
    max_len: usize,
}

impl TopicState {
    fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            groups: HashMap::new(),
            next_id: 1,
            max_len,
        }
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_len {
            if let Some(entry) = self.entries.pop_front() {
                for group in self.groups.values_mut() {
                    group.pending.remove(&entry.id);
                }
            }
        }
    }

    /// Hand the next undelivered record of `group` to `consumer`
    fn deliver_next(&mut self, group: &str, consumer: &str) -> Option<TopicRecord> {
        let cg = self.groups.entry(group.to_string()).or_default();
        let entry = self.entries.iter().find(|e| e.id > cg.cursor)?;
        cg.cursor = entry.id;
        cg.pending
            .insert(entry.id, (consumer.to_string(), Instant::now()));
        Some(entry.to_record())
    }
}

struct SharedState {
    topics: RwLock<HashMap<String, TopicState>>,
    notifiers: RwLock<HashMap<String, Arc<Notify>>>,
    max_len: usize,
}

/// In-memory topic backend
#[derive(Clone)]
pub struct MemoryTopicBackend {
    state: Arc<SharedState>,
}

impl Default for MemoryTopicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTopicBackend {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_TOPIC_MAX_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            state: Arc::new(SharedState {
                topics: RwLock::new(HashMap::new()),
                notifiers: RwLock::new(HashMap::new()),
                max_len: max_len.max(1),
            }),
        }
    }

    fn notifier(&self, topic: &str) -> Arc<Notify> {
        {
            let notifiers = self.state.notifiers.read();
            if let Some(n) = notifiers.get(topic) {
                return Arc::clone(n);
            }
        }
        let mut notifiers = self.state.notifiers.write();
        Arc::clone(
            notifiers
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }
}

#[async_trait]
impl TopicBackend for MemoryTopicBackend {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<String, TopicError> {
        let id = {
            let mut topics = self.state.topics.write();
            let state = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicState::new(self.state.max_len));
            let id = state.next_id;
            state.next_id += 1;
            state.entries.push_back(Entry {
                id,
                key: key.map(<[u8]>::to_vec),
                payload: payload.to_vec(),
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            });
            state.trim();
            id
        };

        self.notifier(topic).notify_one();
        Ok(id.to_string())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<TopicSubscription, TopicError> {
        {
            let mut topics = self.state.topics.write();
            let state = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicState::new(self.state.max_len));
            state
                .groups
                .entry(group.to_string())
                .or_default()
                .consumers
                .insert(consumer.to_string());
        }

        let topic = topic.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();
        let state = Arc::clone(&self.state);
        let notifier = self.notifier(&topic);

        let receiver = stream! {
            loop {
                // Lock scope must end before the await below
                let next = {
                    let mut topics = state.topics.write();
                    topics
                        .get_mut(&topic)
                        .and_then(|t| t.deliver_next(&group, &consumer))
                };

                match next {
                    Some(record) => yield Ok(record),
                    None => notifier.notified().await,
                }
            }
        };

        Ok(TopicSubscription {
            receiver: Box::pin(receiver),
        })
    }

    async fn confirm(&self, topic: &str, group: &str, ids: &[String]) -> Result<(), TopicError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut topics = self.state.topics.write();
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| TopicError::Stream(format!("topic not found: {}", topic)))?;
        let cg = state.groups.get_mut(group).ok_or_else(|| {
            TopicError::ConsumerGroup(format!("consumer group not found: {}", group))
        })?;

        for id in ids {
            let id: u64 = id
                .parse()
                .map_err(|_| TopicError::Stream(format!("invalid record id: {}", id)))?;
            cg.pending.remove(&id);
        }
        Ok(())
    }

    async fn claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<TopicRecord>, TopicError> {
        let mut topics = self.state.topics.write();
        let Some(state) = topics.get_mut(topic) else {
            return Ok(vec![]);
        };
        let Some(cg) = state.groups.get_mut(group) else {
            return Ok(vec![]);
        };

        let now = Instant::now();
        let min_idle = Duration::from_millis(min_idle_ms);
        let mut idle: Vec<u64> = cg
            .pending
            .iter()
            .filter(|(_, (_, delivered))| now.duration_since(*delivered) >= min_idle)
            .map(|(&id, _)| id)
            .collect();
        idle.sort_unstable();
        idle.truncate(count);

        let mut claimed = Vec::with_capacity(idle.len());
        for id in idle {
            if let Some(entry) = state.entries.iter().find(|e| e.id == id) {
                cg.pending.insert(id, (consumer.to_string(), now));
                claimed.push(entry.to_record());
            }
        }
        Ok(claimed)
    }

    async fn stats(&self, topic: &str, group: &str) -> Result<TopicStats, TopicError> {
        let topics = self.state.topics.read();
        let Some(state) = topics.get(topic) else {
            return Ok(TopicStats::default());
        };
        let length = state.entries.len() as u64;
        let Some(cg) = state.groups.get(group) else {
            return Ok(TopicStats {
                length,
                ..Default::default()
            });
        };

        let now = Instant::now();
        let oldest_pending_ms = cg
            .pending
            .values()
            .map(|(_, delivered)| now.duration_since(*delivered).as_millis() as u64)
            .max();

        Ok(TopicStats {
            length,
            pending: cg.pending.len() as u64,
            consumers: cg.consumers.len() as u64,
            oldest_pending_ms,
        })
    }

    async fn health_check(&self) -> Result<(), TopicError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
