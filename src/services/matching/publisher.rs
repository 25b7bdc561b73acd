//! Event publication pipeline
//!
//! Single funnel for everything that leaves the engines: the append-only
//! order_events table, the durable event log topics, the Redis fan-out
//! channels, and in-process broadcast subscribers. Publication is
//! best-effort and never mutates order state; failures are logged and the
//! flow continues.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::BookSnapshot;
use crate::cache::{CacheKey, CacheManager};
use crate::db::RecordStore;
use crate::eventlog::{EventLog, EventTopic};
use crate::models::{Order, OrderEvent, OrderEventType, Trade};

pub struct EventPublisher {
    store: Arc<dyn RecordStore>,
    event_log: Arc<dyn EventLog>,
    cache: Arc<CacheManager>,
    trade_tx: broadcast::Sender<Trade>,
    order_tx: broadcast::Sender<Order>,
    book_tx: broadcast::Sender<BookSnapshot>,
}

impl EventPublisher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        event_log: Arc<dyn EventLog>,
        cache: Arc<CacheManager>,
        channel_capacity: usize,
    ) -> Self {
        let (trade_tx, _) = broadcast::channel(channel_capacity);
        let (order_tx, _) = broadcast::channel(channel_capacity);
        let (book_tx, _) = broadcast::channel(channel_capacity);
        Self {
            store,
            event_log,
            cache,
            trade_tx,
            order_tx,
            book_tx,
        }
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<Trade> {
        self.trade_tx.subscribe()
    }

    pub fn subscribe_orders(&self) -> broadcast::Receiver<Order> {
        self.order_tx.subscribe()
    }

    pub fn subscribe_book_updates(&self) -> broadcast::Receiver<BookSnapshot> {
        self.book_tx.subscribe()
    }

    /// Record an order lifecycle transition: append to order_events, then
    /// fan out the order snapshot on every surface.
    pub async fn order_event(&self, order: &Order, event_type: OrderEventType) {
        let event = OrderEvent::for_order(order, event_type);

        if let Err(e) = self.store.append_event(&event).await {
            tracing::error!(
                order_id = %order.id,
                event_type = %event_type,
                "failed to append order event: {}",
                e
            );
        }

        if let Ok(payload) = serde_json::to_value(&event) {
            if let Err(e) = self.event_log.publish(EventTopic::OrderEvents, &payload).await {
                tracing::warn!(order_id = %order.id, "event log publish failed: {}", e);
            }
        }
        if let Ok(payload) = serde_json::to_value(order) {
            if let Err(e) = self.event_log.publish(EventTopic::Orders, &payload).await {
                tracing::warn!(order_id = %order.id, "event log publish failed: {}", e);
            }
        }

        if let Some(redis) = self.cache.redis() {
            if let Err(e) = redis
                .publish_json(&CacheKey::channel_orders(&order.instrument), order)
                .await
            {
                tracing::warn!(order_id = %order.id, "order fan-out failed: {}", e);
            }
        }

        let _ = self.order_tx.send(order.clone());
    }

    /// Fan out an executed trade.
    pub async fn trade_event(&self, trade: &Trade) {
        if let Ok(payload) = serde_json::to_value(trade) {
            if let Err(e) = self.event_log.publish(EventTopic::Trades, &payload).await {
                tracing::warn!(trade_id = %trade.id, "event log publish failed: {}", e);
            }
        }

        if let Some(redis) = self.cache.redis() {
            if let Err(e) = redis
                .publish_json(&CacheKey::channel_trades(&trade.instrument), trade)
                .await
            {
                tracing::warn!(trade_id = %trade.id, "trade fan-out failed: {}", e);
            }
        }

        let _ = self.trade_tx.send(trade.clone());
    }

    /// Fan out a post-match book snapshot.
    pub async fn book_update(&self, snapshot: &BookSnapshot) {
        if let Ok(payload) = serde_json::to_value(snapshot) {
            if let Err(e) = self
                .event_log
                .publish(EventTopic::OrderbookUpdates, &payload)
                .await
            {
                tracing::warn!(
                    instrument = %snapshot.instrument,
                    "event log publish failed: {}",
                    e
                );
            }
        }

        if let Some(redis) = self.cache.redis() {
            if let Err(e) = redis
                .publish_json(&CacheKey::channel_orderbook(&snapshot.instrument), snapshot)
                .await
            {
                tracing::warn!(
                    instrument = %snapshot.instrument,
                    "book fan-out failed: {}",
                    e
                );
            }
        }

        let _ = self.book_tx.send(snapshot.clone());
    }
}
