//! Durable record store
//!
//! The only authoritative state after a crash lives here: orders, trades and
//! client positions. Events and book snapshots are derived, append-only
//! records. The contract is a trait so the coordinator and engines are
//! testable against the in-memory implementation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Order, OrderEvent, Position, Trade};
use crate::services::matching::BookSnapshot;

pub use crate::retry::RetryPolicy;
pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique-constraint conflict, e.g. a reused idempotency key.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Store-flavored retry: conflicts are surfaced immediately, because
/// retrying a constraint violation cannot succeed.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    crate::retry::with_retry(
        policy,
        op_name,
        |e| matches!(e, StoreError::Conflict(_)),
        operation,
    )
    .await
}

/// Contract over the relational store: atomic single-row upsert, one
/// transaction for a trade plus both order updates plus both position
/// deltas, and read-after-write on the keys below.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Readiness probe, run before recovery.
    async fn ready(&self) -> Result<(), StoreError>;

    /// Persist a freshly accepted order in `open` state. A reused
    /// idempotency key surfaces as `Conflict`.
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Upsert `filled_quantity`, `status`, `updated_at`.
    async fn update_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError>;

    /// One atomic unit: insert the trade, upsert both orders' post-fill
    /// states, apply both signed position deltas. Re-persisting an already
    /// recorded trade id is a no-op, which is what makes position updates
    /// idempotent per trade.
    async fn persist_execution(
        &self,
        trade: &Trade,
        buy_order: &Order,
        sell_order: &Order,
    ) -> Result<(), StoreError>;

    /// Append to the order event log; returns the monotonic event id.
    async fn append_event(&self, event: &OrderEvent) -> Result<i64, StoreError>;

    /// All orders still eligible for a book, ordered by `created_at`
    /// ascending so recovery insertion preserves time priority.
    async fn open_orders(&self) -> Result<Vec<Order>, StoreError>;

    /// Most recent trades first.
    async fn recent_trades(&self, instrument: &str, limit: usize) -> Result<Vec<Trade>, StoreError>;

    async fn positions(&self, client_id: &str) -> Result<Vec<Position>, StoreError>;

    async fn save_snapshot(&self, snapshot: &BookSnapshot) -> Result<(), StoreError>;
}
