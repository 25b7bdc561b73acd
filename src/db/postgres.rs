//! PostgreSQL record store
//!
//! Transactional persistence of orders, trades, events, snapshots and
//! positions. The trade unit (trade insert + both order upserts + both
//! position deltas) runs in one transaction keyed on the trade id, so a
//! replay applies nothing.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{with_retry, RecordStore, RetryPolicy, StoreError};
use crate::models::{Order, OrderEvent, Position, PositionDelta, Trade};
use crate::services::matching::BookSnapshot;

const SCHEMA: &str = r#"
DO $$ BEGIN
    CREATE TYPE order_side AS ENUM ('buy', 'sell');
EXCEPTION WHEN duplicate_object THEN NULL;
END $$;

DO $$ BEGIN
    CREATE TYPE order_type AS ENUM ('limit', 'market');
EXCEPTION WHEN duplicate_object THEN NULL;
END $$;

DO $$ BEGIN
    CREATE TYPE order_status AS ENUM ('open', 'partially_filled', 'filled', 'cancelled', 'rejected');
EXCEPTION WHEN duplicate_object THEN NULL;
END $$;

CREATE TABLE IF NOT EXISTS orders (
    id              UUID PRIMARY KEY,
    client_id       TEXT NOT NULL,
    instrument      TEXT NOT NULL,
    side            order_side NOT NULL,
    order_type      order_type NOT NULL,
    price           NUMERIC,
    quantity        NUMERIC NOT NULL,
    filled_quantity NUMERIC NOT NULL DEFAULT 0,
    status          order_status NOT NULL,
    idempotency_key TEXT,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS orders_idempotency_key_idx
    ON orders (idempotency_key) WHERE idempotency_key IS NOT NULL;

CREATE INDEX IF NOT EXISTS orders_open_idx
    ON orders (instrument, created_at) WHERE status IN ('open', 'partially_filled');

CREATE TABLE IF NOT EXISTS trades (
    id            UUID PRIMARY KEY,
    instrument    TEXT NOT NULL,
    buy_order_id  UUID NOT NULL REFERENCES orders (id),
    sell_order_id UUID NOT NULL REFERENCES orders (id),
    price         NUMERIC NOT NULL,
    quantity      NUMERIC NOT NULL,
    executed_at   TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS trades_instrument_idx ON trades (instrument, executed_at DESC);

CREATE TABLE IF NOT EXISTS order_events (
    event_id   BIGSERIAL PRIMARY KEY,
    order_id   UUID NOT NULL,
    event_type TEXT NOT NULL,
    event_data JSONB NOT NULL,
    timestamp  TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS order_events_order_idx ON order_events (order_id, event_id);

CREATE TABLE IF NOT EXISTS order_book_snapshots (
    id          BIGSERIAL PRIMARY KEY,
    instrument  TEXT NOT NULL,
    bids        JSONB NOT NULL,
    asks        JSONB NOT NULL,
    captured_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS order_book_snapshots_instrument_idx
    ON order_book_snapshots (instrument, captured_at);

CREATE TABLE IF NOT EXISTS client_positions (
    client_id    TEXT NOT NULL,
    instrument   TEXT NOT NULL,
    net_quantity NUMERIC NOT NULL,
    total_cost   NUMERIC NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (client_id, instrument)
);
"#;

pub struct PgRecordStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgRecordStore {
    /// Connect, apply the schema, and wrap the pool with the retry policy.
    pub async fn connect(database_url: &str, retry: RetryPolicy) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        let store = Self { pool, retry };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        use sqlx::Executor;
        // simple-query protocol; the server handles the multi-statement batch
        self.pool.execute(SCHEMA).await?;
        Ok(())
    }

    fn map_unique_violation(e: sqlx::Error, what: &str) -> StoreError {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Conflict(format!("{}: {}", what, db_err.message()));
            }
        }
        StoreError::Database(e)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn ready(&self) -> Result<(), StoreError> {
        with_retry(&self.retry, "ready", || {
            let pool = self.pool.clone();
            async move {
                sqlx::query("SELECT 1").execute(&pool).await?;
                Ok(())
            }
        })
        .await
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        with_retry(&self.retry, "insert_order", || {
            let pool = self.pool.clone();
            let order = order.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO orders
                        (id, client_id, instrument, side, order_type, price, quantity,
                         filled_quantity, status, idempotency_key, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(order.id)
                .bind(&order.client_id)
                .bind(&order.instrument)
                .bind(order.side)
                .bind(order.order_type)
                .bind(order.price)
                .bind(order.quantity)
                .bind(order.filled_quantity)
                .bind(order.status)
                .bind(&order.idempotency_key)
                .bind(order.created_at)
                .bind(order.updated_at)
                .execute(&pool)
                .await
                .map_err(|e| Self::map_unique_violation(e, "insert_order"))?;
                Ok(())
            }
        })
        .await
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        with_retry(&self.retry, "update_order", || {
            let pool = self.pool.clone();
            let order = order.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO orders
                        (id, client_id, instrument, side, order_type, price, quantity,
                         filled_quantity, status, idempotency_key, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    ON CONFLICT (id) DO UPDATE SET
                        filled_quantity = EXCLUDED.filled_quantity,
                        status = EXCLUDED.status,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(order.id)
                .bind(&order.client_id)
                .bind(&order.instrument)
                .bind(order.side)
                .bind(order.order_type)
                .bind(order.price)
                .bind(order.quantity)
                .bind(order.filled_quantity)
                .bind(order.status)
                .bind(&order.idempotency_key)
                .bind(order.created_at)
                .bind(order.updated_at)
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        with_retry(&self.retry, "get_order", || {
            let pool = self.pool.clone();
            async move {
                let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
                    .bind(order_id)
                    .fetch_optional(&pool)
                    .await?;
                Ok(order)
            }
        })
        .await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        with_retry(&self.retry, "find_by_idempotency_key", || {
            let pool = self.pool.clone();
            let key = key.to_string();
            async move {
                let order =
                    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE idempotency_key = $1")
                        .bind(&key)
                        .fetch_optional(&pool)
                        .await?;
                Ok(order)
            }
        })
        .await
    }

    async fn persist_execution(
        &self,
        trade: &Trade,
        buy_order: &Order,
        sell_order: &Order,
    ) -> Result<(), StoreError> {
        with_retry(&self.retry, "persist_execution", || {
            let pool = self.pool.clone();
            let trade = trade.clone();
            let buy_order = buy_order.clone();
            let sell_order = sell_order.clone();
            async move {
                let mut tx = pool.begin().await?;

                let inserted = sqlx::query(
                    r#"
                    INSERT INTO trades
                        (id, instrument, buy_order_id, sell_order_id, price, quantity, executed_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(trade.id)
                .bind(&trade.instrument)
                .bind(trade.buy_order_id)
                .bind(trade.sell_order_id)
                .bind(trade.price)
                .bind(trade.quantity)
                .bind(trade.executed_at)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                // Replayed trade: leave orders and positions untouched.
                if inserted == 0 {
                    tx.commit().await?;
                    return Ok(());
                }

                for order in [&buy_order, &sell_order] {
                    sqlx::query(
                        r#"
                        UPDATE orders
                        SET filled_quantity = $2, status = $3, updated_at = $4
                        WHERE id = $1
                        "#,
                    )
                    .bind(order.id)
                    .bind(order.filled_quantity)
                    .bind(order.status)
                    .bind(order.updated_at)
                    .execute(&mut *tx)
                    .await?;
                }

                for delta in PositionDelta::from_trade(
                    &trade,
                    &buy_order.client_id,
                    &sell_order.client_id,
                ) {
                    sqlx::query(
                        r#"
                        INSERT INTO client_positions
                            (client_id, instrument, net_quantity, total_cost, last_updated)
                        VALUES ($1, $2, $3, $4, $5)
                        ON CONFLICT (client_id, instrument) DO UPDATE SET
                            net_quantity = client_positions.net_quantity + EXCLUDED.net_quantity,
                            total_cost = client_positions.total_cost + EXCLUDED.total_cost,
                            last_updated = EXCLUDED.last_updated
                        "#,
                    )
                    .bind(&delta.client_id)
                    .bind(&delta.instrument)
                    .bind(delta.net_quantity)
                    .bind(delta.total_cost)
                    .bind(trade.executed_at)
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;
                Ok(())
            }
        })
        .await
    }

    async fn append_event(&self, event: &OrderEvent) -> Result<i64, StoreError> {
        with_retry(&self.retry, "append_event", || {
            let pool = self.pool.clone();
            let event = event.clone();
            async move {
                let event_id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO order_events (order_id, event_type, event_data, timestamp)
                    VALUES ($1, $2, $3, $4)
                    RETURNING event_id
                    "#,
                )
                .bind(event.order_id)
                .bind(event.event_type.as_str())
                .bind(&event.event_data)
                .bind(event.timestamp)
                .fetch_one(&pool)
                .await?;
                Ok(event_id)
            }
        })
        .await
    }

    async fn open_orders(&self) -> Result<Vec<Order>, StoreError> {
        with_retry(&self.retry, "open_orders", || {
            let pool = self.pool.clone();
            async move {
                let orders = sqlx::query_as::<_, Order>(
                    r#"
                    SELECT * FROM orders
                    WHERE status IN ('open', 'partially_filled')
                    ORDER BY created_at ASC
                    "#,
                )
                .fetch_all(&pool)
                .await?;
                Ok(orders)
            }
        })
        .await
    }

    async fn recent_trades(&self, instrument: &str, limit: usize) -> Result<Vec<Trade>, StoreError> {
        with_retry(&self.retry, "recent_trades", || {
            let pool = self.pool.clone();
            let instrument = instrument.to_string();
            async move {
                let trades = sqlx::query_as::<_, Trade>(
                    r#"
                    SELECT * FROM trades
                    WHERE instrument = $1
                    ORDER BY executed_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(&instrument)
                .bind(limit as i64)
                .fetch_all(&pool)
                .await?;
                Ok(trades)
            }
        })
        .await
    }

    async fn positions(&self, client_id: &str) -> Result<Vec<Position>, StoreError> {
        with_retry(&self.retry, "positions", || {
            let pool = self.pool.clone();
            let client_id = client_id.to_string();
            async move {
                let positions = sqlx::query_as::<_, Position>(
                    "SELECT * FROM client_positions WHERE client_id = $1",
                )
                .bind(&client_id)
                .fetch_all(&pool)
                .await?;
                Ok(positions)
            }
        })
        .await
    }

    async fn save_snapshot(&self, snapshot: &BookSnapshot) -> Result<(), StoreError> {
        with_retry(&self.retry, "save_snapshot", || {
            let pool = self.pool.clone();
            let snapshot = snapshot.clone();
            async move {
                let bids = serde_json::to_value(&snapshot.bids)?;
                let asks = serde_json::to_value(&snapshot.asks)?;
                sqlx::query(
                    r#"
                    INSERT INTO order_book_snapshots (instrument, bids, asks, captured_at)
                    VALUES ($1, $2, $3, to_timestamp($4::double precision / 1000))
                    "#,
                )
                .bind(&snapshot.instrument)
                .bind(bids)
                .bind(asks)
                .bind(snapshot.timestamp as f64)
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }
}
