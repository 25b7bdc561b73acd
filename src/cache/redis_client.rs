//! Redis client
//!
//! Thin wrapper over one shared `ConnectionManager`, retried with the same
//! bounded-backoff policy the record store uses. Only the operations this
//! system needs exist here: idempotency writes (SET NX EX), key reads,
//! JSON fan-out (PUBLISH), event-log appends (XADD) and the readiness PING.
//! An operation that fails drops the cached connection, so the next attempt
//! starts from a fresh one.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::retry::{with_retry, RetryPolicy};

pub struct RedisClient {
    url: String,
    retry: RetryPolicy,
    client: Client,
    manager: RwLock<Option<ConnectionManager>>,
}

impl RedisClient {
    /// Connect eagerly; refusing to come up beats handing out a client that
    /// was never reachable.
    pub async fn connect(url: &str, retry: RetryPolicy) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        tracing::info!(url, "redis connected");
        Ok(Self {
            url: url.to_string(),
            retry,
            client,
            manager: RwLock::new(Some(manager)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Hand out the cached connection, rebuilding it after a failure
    /// invalidated it.
    async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        if let Some(conn) = self.manager.read().await.clone() {
            return Ok(conn);
        }
        let mut slot = self.manager.write().await;
        if let Some(conn) = slot.clone() {
            return Ok(conn);
        }
        tracing::info!(url = %self.url, "re-establishing redis connection");
        let conn = ConnectionManager::new(self.client.clone()).await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn invalidate(&self) {
        *self.manager.write().await = None;
    }

    /// GET a key.
    pub async fn get<T: redis::FromRedisValue>(&self, key: &str) -> Result<Option<T>, RedisError> {
        with_retry(&self.retry, "redis GET", |_| false, || {
            let key = key.to_string();
            async move {
                let mut conn = self.connection().await?;
                let reply: Result<Option<T>, RedisError> = conn.get(&key).await;
                match reply {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        self.invalidate().await;
                        Err(e)
                    }
                }
            }
        })
        .await
    }

    /// SET NX EX — first writer wins; returns whether this call set the key.
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, RedisError> {
        with_retry(&self.retry, "redis SET NX", |_| false, || {
            let key = key.to_string();
            let value = value.to_string();
            async move {
                let mut conn = self.connection().await?;
                let reply: Result<Option<String>, RedisError> = redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async(&mut conn)
                    .await;
                match reply {
                    Ok(set) => Ok(set.is_some()),
                    Err(e) => {
                        self.invalidate().await;
                        Err(e)
                    }
                }
            }
        })
        .await
    }

    /// Serialize `message` and PUBLISH it on `channel`; returns the number
    /// of subscribers that received it.
    pub async fn publish_json<T: Serialize>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<i64, RedisError> {
        let payload = serde_json::to_string(message).map_err(|e| {
            RedisError::from((
                redis::ErrorKind::IoError,
                "payload serialization failed",
                e.to_string(),
            ))
        })?;

        with_retry(&self.retry, "redis PUBLISH", |_| false, || {
            let channel = channel.to_string();
            let payload = payload.clone();
            async move {
                let mut conn = self.connection().await?;
                let reply: Result<i64, RedisError> = conn.publish(&channel, &payload).await;
                match reply {
                    Ok(receivers) => Ok(receivers),
                    Err(e) => {
                        self.invalidate().await;
                        Err(e)
                    }
                }
            }
        })
        .await
    }

    /// XADD a payload field to a stream; returns the server-assigned entry
    /// id.
    pub async fn xadd(&self, stream: &str, payload: &str) -> Result<String, RedisError> {
        with_retry(&self.retry, "redis XADD", |_| false, || {
            let stream = stream.to_string();
            let payload = payload.to_string();
            async move {
                let mut conn = self.connection().await?;
                let reply: Result<String, RedisError> = redis::cmd("XADD")
                    .arg(&stream)
                    .arg("*")
                    .arg("payload")
                    .arg(&payload)
                    .query_async(&mut conn)
                    .await;
                match reply {
                    Ok(id) => Ok(id),
                    Err(e) => {
                        self.invalidate().await;
                        Err(e)
                    }
                }
            }
        })
        .await
    }

    /// Readiness check.
    pub async fn ping(&self) -> Result<(), RedisError> {
        with_retry(&self.retry, "redis PING", |_| false, || async move {
            let mut conn = self.connection().await?;
            let reply: Result<String, RedisError> =
                redis::cmd("PING").query_async(&mut conn).await;
            match reply {
                Ok(_) => Ok(()),
                Err(e) => {
                    self.invalidate().await;
                    Err(e)
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    // Needs a local Redis; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_operations_against_live_redis() {
        let redis = RedisClient::connect("redis://127.0.0.1:6379", RetryPolicy::default())
            .await
            .unwrap();
        redis.ping().await.unwrap();

        let key = format!("it:{}", Uuid::new_v4());
        assert!(redis.set_if_absent(&key, "first", 60).await.unwrap());
        assert!(!redis.set_if_absent(&key, "second", 60).await.unwrap());
        let value: Option<String> = redis.get(&key).await.unwrap();
        assert_eq!(value.as_deref(), Some("first"));

        let receivers = redis
            .publish_json("it:channel", &serde_json::json!({"ok": true}))
            .await
            .unwrap();
        assert!(receivers >= 0);

        let entry_id = redis.xadd(&format!("it:{}", Uuid::new_v4()), "{}").await.unwrap();
        assert!(!entry_id.is_empty());
    }
}
