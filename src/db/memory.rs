//! In-memory record store
//!
//! Backs tests and recovery drills with the same contract as Postgres.
//! Single mutex over the whole state; throughput is not a goal here,
//! faithfulness to the transactional semantics is.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{RecordStore, StoreError};
use crate::models::{Order, OrderEvent, OrderStatus, Position, PositionDelta, Trade};
use crate::services::matching::BookSnapshot;

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    /// Insertion order, which recovery relies on for time priority.
    order_sequence: Vec<Uuid>,
    idempotency_keys: HashMap<String, Uuid>,
    trades: Vec<Trade>,
    trade_ids: HashSet<Uuid>,
    positions: HashMap<(String, String), Position>,
    events: Vec<OrderEvent>,
    next_event_id: i64,
    snapshots: Vec<BookSnapshot>,
}

#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Test-facing inspection helpers.

    pub fn trade_count(&self) -> usize {
        self.inner.lock().trades.len()
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn events_for(&self, order_id: Uuid) -> Vec<OrderEvent> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().snapshots.len()
    }

    pub fn all_positions(&self) -> Vec<Position> {
        self.inner.lock().positions.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn ready(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict(format!("order {} exists", order.id)));
        }
        if let Some(key) = &order.idempotency_key {
            if inner.idempotency_keys.contains_key(key) {
                return Err(StoreError::Conflict(format!(
                    "idempotency key {} exists",
                    key
                )));
            }
            inner.idempotency_keys.insert(key.clone(), order.id);
        }
        inner.orders.insert(order.id, order.clone());
        inner.order_sequence.push(order.id);
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.orders.get_mut(&order.id) {
            Some(existing) => {
                existing.filled_quantity = order.filled_quantity;
                existing.status = order.status;
                existing.updated_at = order.updated_at;
                Ok(())
            }
            None => {
                inner.orders.insert(order.id, order.clone());
                inner.order_sequence.push(order.id);
                Ok(())
            }
        }
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.lock().orders.get(&order_id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .idempotency_keys
            .get(key)
            .and_then(|id| inner.orders.get(id))
            .cloned())
    }

    async fn persist_execution(
        &self,
        trade: &Trade,
        buy_order: &Order,
        sell_order: &Order,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        // Replayed trade: the whole unit is a no-op.
        if !inner.trade_ids.insert(trade.id) {
            return Ok(());
        }
        inner.trades.push(trade.clone());

        for order in [buy_order, sell_order] {
            match inner.orders.get_mut(&order.id) {
                Some(existing) => {
                    existing.filled_quantity = order.filled_quantity;
                    existing.status = order.status;
                    existing.updated_at = order.updated_at;
                }
                None => {
                    inner.orders.insert(order.id, order.clone());
                    inner.order_sequence.push(order.id);
                }
            }
        }

        let now = Utc::now();
        for delta in PositionDelta::from_trade(trade, &buy_order.client_id, &sell_order.client_id) {
            let key = (delta.client_id.clone(), delta.instrument.clone());
            inner
                .positions
                .entry(key)
                .or_insert_with(|| Position::empty(&delta.client_id, &delta.instrument, now))
                .apply(&delta, now);
        }
        Ok(())
    }

    async fn append_event(&self, event: &OrderEvent) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_event_id += 1;
        let id = inner.next_event_id;
        let mut stored = event.clone();
        stored.event_id = id;
        inner.events.push(stored);
        Ok(id)
    }

    async fn open_orders(&self) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .order_sequence
            .iter()
            .filter_map(|id| inner.orders.get(id))
            .filter(|o| {
                matches!(
                    o.status,
                    OrderStatus::Open | OrderStatus::PartiallyFilled
                )
            })
            .cloned()
            .collect())
    }

    async fn recent_trades(&self, instrument: &str, limit: usize) -> Result<Vec<Trade>, StoreError> {
        Ok(self
            .inner
            .lock()
            .trades
            .iter()
            .rev()
            .filter(|t| t.instrument == instrument)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn positions(&self, client_id: &str) -> Result<Vec<Position>, StoreError> {
        Ok(self
            .inner
            .lock()
            .positions
            .values()
            .filter(|p| p.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn save_snapshot(&self, snapshot: &BookSnapshot) -> Result<(), StoreError> {
        self.inner.lock().snapshots.push(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderInput, OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn order(client: &str, side: OrderSide) -> Order {
        OrderInput {
            order_id: None,
            client_id: client.to_string(),
            instrument: "BTC-USD".to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(dec!(70000)),
            quantity: dec!(1),
        }
        .into_order(None, Utc::now())
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_conflicts() {
        let store = MemoryRecordStore::new();
        let mut a = order("alice", OrderSide::Buy);
        a.idempotency_key = Some("K".to_string());
        let mut b = order("bob", OrderSide::Sell);
        b.idempotency_key = Some("K".to_string());

        store.insert_order(&a).await.unwrap();
        assert!(matches!(
            store.insert_order(&b).await,
            Err(StoreError::Conflict(_))
        ));
        let found = store.find_by_idempotency_key("K").await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
    }

    #[tokio::test]
    async fn test_execution_replay_is_idempotent() {
        let store = MemoryRecordStore::new();
        let mut buyer = order("alice", OrderSide::Buy);
        let mut seller = order("bob", OrderSide::Sell);
        store.insert_order(&buyer).await.unwrap();
        store.insert_order(&seller).await.unwrap();

        let now = Utc::now();
        let trade = Trade::between(&buyer, &seller, dec!(70000), dec!(1), now);
        buyer.apply_fill(dec!(1), now);
        seller.apply_fill(dec!(1), now);

        store.persist_execution(&trade, &buyer, &seller).await.unwrap();
        store.persist_execution(&trade, &buyer, &seller).await.unwrap();

        assert_eq!(store.trade_count(), 1);
        let alice = store.positions("alice").await.unwrap();
        assert_eq!(alice[0].net_quantity, dec!(1));
        let bob = store.positions("bob").await.unwrap();
        assert_eq!(bob[0].net_quantity, dec!(-1));
    }

    #[tokio::test]
    async fn test_open_orders_preserve_insertion_order() {
        let store = MemoryRecordStore::new();
        let first = order("alice", OrderSide::Buy);
        let second = order("bob", OrderSide::Buy);
        store.insert_order(&first).await.unwrap();
        store.insert_order(&second).await.unwrap();

        let mut filled = order("carol", OrderSide::Sell);
        store.insert_order(&filled).await.unwrap();
        filled.apply_fill(dec!(1), Utc::now());
        store.update_order(&filled).await.unwrap();

        let open = store.open_orders().await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, first.id);
        assert_eq!(open[1].id, second.id);
    }

    #[tokio::test]
    async fn test_event_ids_are_monotonic() {
        let store = MemoryRecordStore::new();
        let o = order("alice", OrderSide::Buy);
        let event = crate::models::OrderEvent::for_order(&o, crate::models::OrderEventType::Created);
        let a = store.append_event(&event).await.unwrap();
        let b = store.append_event(&event).await.unwrap();
        assert!(b > a);
    }
}
