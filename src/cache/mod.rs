//! Fast KV store integration
//!
//! Redis carries the idempotency cache and the subscriber fan-out. Neither
//! is authoritative, so the manager degrades gracefully: with Redis down the
//! idempotency cache falls back to an in-process map (best effort — the
//! unique key constraint in the record store still backstops correctness)
//! and fan-out publishing is skipped with a warning.

pub mod idempotency;
pub mod keys;
pub mod redis_client;

use std::sync::Arc;

use crate::retry::RetryPolicy;

pub use idempotency::{IdempotencyCache, MemoryIdempotencyCache, RedisIdempotencyCache};
pub use keys::CacheKey;
pub use redis_client::RedisClient;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct CacheManager {
    config: CacheConfig,
    redis: Option<Arc<RedisClient>>,
    idempotency: Arc<dyn IdempotencyCache>,
}

impl CacheManager {
    /// Connect to Redis; on failure come up degraded rather than refusing to
    /// start.
    pub async fn new(config: CacheConfig) -> Self {
        match RedisClient::connect(&config.redis_url, config.retry.clone()).await {
            Ok(client) => {
                let redis = Arc::new(client);
                Self {
                    config,
                    idempotency: Arc::new(RedisIdempotencyCache::new(redis.clone())),
                    redis: Some(redis),
                }
            }
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), running degraded", e);
                Self {
                    config,
                    redis: None,
                    idempotency: Arc::new(MemoryIdempotencyCache::new()),
                }
            }
        }
    }

    /// Build a manager around in-process implementations only (tests).
    pub fn in_memory() -> Self {
        Self {
            config: CacheConfig::default(),
            redis: None,
            idempotency: Arc::new(MemoryIdempotencyCache::new()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.redis.is_some()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn redis(&self) -> Option<&Arc<RedisClient>> {
        self.redis.as_ref()
    }

    pub fn idempotency(&self) -> &Arc<dyn IdempotencyCache> {
        &self.idempotency
    }
}
