//! Idempotency cache
//!
//! key -> order_id mappings with a finite TTL. Entries are single-writer
//! (SET NX); losing them is safe because the order row itself is durable
//! and carries the unique key constraint.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::RedisError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::keys::CacheKey;
use super::redis_client::RedisClient;

#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Record key -> order_id unless the key already exists. Returns whether
    /// this call won the write.
    async fn set_if_absent(
        &self,
        key: &str,
        order_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, RedisError>;

    async fn get(&self, key: &str) -> Result<Option<Uuid>, RedisError>;
}

/// Redis-backed cache.
pub struct RedisIdempotencyCache {
    redis: Arc<RedisClient>,
}

impl RedisIdempotencyCache {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn set_if_absent(
        &self,
        key: &str,
        order_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, RedisError> {
        self.redis
            .set_if_absent(
                &CacheKey::idempotency(key),
                &order_id.to_string(),
                ttl.as_secs().max(1),
            )
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Uuid>, RedisError> {
        let value: Option<String> = self.redis.get(&CacheKey::idempotency(key)).await?;
        Ok(value.and_then(|v| Uuid::parse_str(&v).ok()))
    }
}

/// In-process cache, used in tests and when Redis is degraded.
#[derive(Default)]
pub struct MemoryIdempotencyCache {
    entries: Mutex<HashMap<String, (Uuid, Instant)>>,
}

impl MemoryIdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyCache for MemoryIdempotencyCache {
    async fn set_if_absent(
        &self,
        key: &str,
        order_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, RedisError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                entries.insert(key.to_string(), (order_id, now + ttl));
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Uuid>, RedisError> {
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(id, _)| *id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_writer_wins() {
        let cache = MemoryIdempotencyCache::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let ttl = Duration::from_secs(60);

        assert!(cache.set_if_absent("K", first, ttl).await.unwrap());
        assert!(!cache.set_if_absent("K", second, ttl).await.unwrap());
        assert_eq!(cache.get("K").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_expired_entry_is_gone() {
        let cache = MemoryIdempotencyCache::new();
        let id = Uuid::new_v4();
        cache
            .set_if_absent("K", id, Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get("K").await.unwrap(), None);
        // and the slot is writable again
        assert!(cache
            .set_if_absent("K", Uuid::new_v4(), Duration::from_secs(60))
            .await
            .unwrap());
    }
}
