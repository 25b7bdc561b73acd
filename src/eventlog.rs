//! Durable event log
//!
//! Topic-partitioned append-only stream. Producers are fire-and-forget with
//! at-least-once semantics; consumers tolerate duplicates. The Redis
//! implementation appends to one stream per topic; the in-memory
//! implementation backs tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::cache::RedisClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTopic {
    Orders,
    Trades,
    OrderbookUpdates,
    OrderEvents,
}

impl EventTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::Orders => "orders",
            EventTopic::Trades => "trades",
            EventTopic::OrderbookUpdates => "orderbook-updates",
            EventTopic::OrderEvents => "order-events",
        }
    }
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a payload to a topic. Failures are the caller's to log; they
    /// never mutate order state.
    async fn publish(&self, topic: EventTopic, payload: &Value) -> Result<(), String>;
}

/// Redis Streams producer: one stream per topic, server-assigned ids keep
/// per-topic ordering.
pub struct RedisEventLog {
    redis: Arc<RedisClient>,
}

impl RedisEventLog {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn publish(&self, topic: EventTopic, payload: &Value) -> Result<(), String> {
        let json = payload.to_string();
        self.redis
            .xadd(topic.as_str(), &json)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// In-memory log for tests.
#[derive(Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<(EventTopic, Value)>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn topic_entries(&self, topic: EventTopic) -> Vec<Value> {
        self.entries
            .lock()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn publish(&self, topic: EventTopic, payload: &Value) -> Result<(), String> {
        self.entries.lock().push((topic, payload.clone()));
        Ok(())
    }
}

/// A log that drops everything, for callers that opted out.
pub struct NullEventLog;

#[async_trait]
impl EventLog for NullEventLog {
    async fn publish(&self, _topic: EventTopic, _payload: &Value) -> Result<(), String> {
        Ok(())
    }
}
