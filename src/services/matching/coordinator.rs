//! Exchange coordinator
//!
//! The only component external callers interact with. Validates input,
//! enforces idempotency, persists accepted orders, funnels writes into the
//! owning engine's queue, and serves the read surface from warm engine
//! state with the record store as fallback.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::engine::{EngineHandle, InstrumentEngine};
use super::history::TradeHistory;
use super::orderbook::OrderBook;
use super::publisher::EventPublisher;
use super::types::{BookSnapshot, ExchangeError, SubmitResult};
use crate::cache::CacheManager;
use crate::db::{RecordStore, StoreError};
use crate::eventlog::EventLog;
use crate::metrics;
use crate::models::{Order, OrderEventType, OrderInput, OrderStatus, Position, Trade};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// TTL on idempotency-key mappings. Finite by design; clients needing
    /// longer idempotency supply their own order id.
    pub idempotency_ttl: Duration,
    /// Bound on each engine's command queue; senders await capacity.
    pub engine_queue_depth: usize,
    /// Levels in the book snapshot returned with each submission.
    pub book_depth: usize,
    /// Hard cap on `get_book` depth.
    pub max_book_levels: usize,
    /// Hard cap on `get_recent_trades`.
    pub max_recent_trades: usize,
    /// Per-instrument in-memory trade history size.
    pub history_capacity: usize,
    /// Broadcast channel capacity for in-process subscribers.
    pub broadcast_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl: Duration::from_secs(3600),
            engine_queue_depth: 1024,
            book_depth: 20,
            max_book_levels: 100,
            max_recent_trades: 1000,
            history_capacity: 1000,
            broadcast_capacity: 1024,
        }
    }
}

pub struct ExchangeCoordinator {
    store: Arc<dyn RecordStore>,
    cache: Arc<CacheManager>,
    publisher: Arc<EventPublisher>,
    history: Arc<TradeHistory>,
    engines: DashMap<String, EngineHandle>,
    config: CoordinatorConfig,
}

impl ExchangeCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<CacheManager>,
        event_log: Arc<dyn EventLog>,
        config: CoordinatorConfig,
    ) -> Self {
        let publisher = Arc::new(EventPublisher::new(
            store.clone(),
            event_log,
            cache.clone(),
            config.broadcast_capacity,
        ));
        let history = Arc::new(TradeHistory::new(config.history_capacity));
        Self {
            store,
            cache,
            publisher,
            history,
            engines: DashMap::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Instruments with a live engine.
    pub fn instruments(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.key().clone()).collect()
    }

    // ========================================================================
    // Write surface
    // ========================================================================

    /// Submit an order, returning its final state, the trades it produced
    /// and the post-match top of book.
    pub async fn submit_order(
        &self,
        input: OrderInput,
        idempotency_key: Option<String>,
    ) -> Result<SubmitResult, ExchangeError> {
        input.validate()?;
        let started = Instant::now();

        // Idempotency: a known key resolves to the prior order, no
        // re-submission.
        if let Some(key) = &idempotency_key {
            match self.cache.idempotency().get(key).await {
                Ok(Some(order_id)) => {
                    if let Some(order) = self.store.get_order(order_id).await.map_err(store_err)? {
                        return self.replay_result(order).await;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("idempotency lookup failed, proceeding: {}", e),
            }
        }

        let order = input.into_order(idempotency_key.clone(), Utc::now());

        // Persist in open state before anything else can observe the order.
        match self.store.insert_order(&order).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                // the cache entry was lost (or the client reused its own
                // order id); the unique constraints backstop idempotency
                if let Some(key) = &idempotency_key {
                    if let Some(existing) = self
                        .store
                        .find_by_idempotency_key(key)
                        .await
                        .map_err(store_err)?
                    {
                        return self.replay_result(existing).await;
                    }
                }
                if let Some(existing) =
                    self.store.get_order(order.id).await.map_err(store_err)?
                {
                    return self.replay_result(existing).await;
                }
                return Err(ExchangeError::Store(
                    "conflicting submission could not be resolved".to_string(),
                ));
            }
            Err(e) => return Err(store_err(e)),
        }

        // Key mapping only after the order is durable: a crash between the
        // two loses idempotency, never creates an orphan mapping.
        if let Some(key) = &idempotency_key {
            if let Err(e) = self
                .cache
                .idempotency()
                .set_if_absent(key, order.id, self.config.idempotency_ttl)
                .await
            {
                tracing::warn!(order_id = %order.id, "idempotency write failed: {}", e);
            }
        }

        self.publisher
            .order_event(&order, OrderEventType::Created)
            .await;
        metrics::record_order_submitted(
            &order.instrument,
            &order.side.to_string(),
            &order.order_type.to_string(),
        );

        let handle = self.ensure_engine(&order.instrument);
        let instrument = order.instrument.clone();
        let outcome = handle.submit(order).await?;

        self.publisher.book_update(&outcome.book).await;
        metrics::record_match(
            &instrument,
            outcome.trades.len(),
            started.elapsed().as_secs_f64(),
        );
        if outcome.order.status == OrderStatus::Rejected {
            metrics::record_order_rejected(&instrument);
        }

        Ok(SubmitResult {
            order: outcome.order,
            trades: outcome.trades,
            book: outcome.book,
            idempotent_replay: false,
        })
    }

    async fn replay_result(&self, order: Order) -> Result<SubmitResult, ExchangeError> {
        metrics::record_idempotent_replay();
        let book = self
            .get_book(&order.instrument, self.config.book_depth)
            .await?;
        Ok(SubmitResult {
            order,
            trades: Vec::new(),
            book,
            idempotent_replay: true,
        })
    }

    /// Cancel an order. Idempotent: cancelling an already-terminal order
    /// returns it unchanged and emits nothing.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        instrument: Option<&str>,
    ) -> Result<Order, ExchangeError> {
        let instrument = match instrument {
            Some(i) => i.to_string(),
            None => self
                .store
                .get_order(order_id)
                .await
                .map_err(store_err)?
                .ok_or(ExchangeError::NotFoundOrTerminal(order_id))?
                .instrument,
        };

        if let Some(handle) = self.engines.get(&instrument).map(|h| h.clone()) {
            if let Some(cancelled) = handle.cancel(order_id).await? {
                metrics::record_order_cancelled(&instrument);
                return Ok(cancelled);
            }
        }

        // Not in the warm book: either terminal, unknown, a wrong instrument
        // hint, or a crash-recovered order whose engine never saw it.
        match self.store.get_order(order_id).await.map_err(store_err)? {
            Some(order) if order.status.is_terminal() => Ok(order),
            Some(mut order) => {
                if order.instrument != instrument {
                    if let Some(handle) = self.engines.get(&order.instrument).map(|h| h.clone()) {
                        if let Some(cancelled) = handle.cancel(order_id).await? {
                            metrics::record_order_cancelled(&order.instrument);
                            return Ok(cancelled);
                        }
                    }
                }
                order.cancel(Utc::now());
                self.store.update_order(&order).await.map_err(store_err)?;
                self.publisher
                    .order_event(&order, OrderEventType::Cancelled)
                    .await;
                metrics::record_order_cancelled(&instrument);
                Ok(order)
            }
            None => Err(ExchangeError::NotFoundOrTerminal(order_id)),
        }
    }

    /// Capture, persist and publish a snapshot of one instrument's book
    /// right now.
    pub async fn request_snapshot(&self, instrument: &str) -> Result<BookSnapshot, ExchangeError> {
        let handle = self
            .engines
            .get(instrument)
            .map(|h| h.clone())
            .ok_or_else(|| {
                ExchangeError::Validation(format!("no active book for {}", instrument))
            })?;
        let snapshot = handle.snapshot(self.config.book_depth).await?;

        if let Err(e) = self.store.save_snapshot(&snapshot).await {
            tracing::warn!(instrument, "snapshot persistence failed: {}", e);
        }
        self.publisher.book_update(&snapshot).await;
        metrics::record_snapshot(instrument);
        Ok(snapshot)
    }

    // ========================================================================
    // Read surface
    // ========================================================================

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, ExchangeError> {
        self.store
            .get_order(order_id)
            .await
            .map_err(store_err)?
            .ok_or(ExchangeError::NotFoundOrTerminal(order_id))
    }

    /// Aggregated book depth. An instrument with no live engine has no open
    /// orders, so its book is empty.
    pub async fn get_book(
        &self,
        instrument: &str,
        levels: usize,
    ) -> Result<BookSnapshot, ExchangeError> {
        let levels = levels.clamp(1, self.config.max_book_levels);
        match self.engines.get(instrument).map(|h| h.clone()) {
            Some(handle) => handle.snapshot(levels).await,
            None => Ok(BookSnapshot::empty(instrument)),
        }
    }

    /// Recent trades, newest first, from the in-memory ring with the record
    /// store as fallback for cold instruments.
    pub async fn get_recent_trades(
        &self,
        instrument: &str,
        limit: usize,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let limit = limit.clamp(1, self.config.max_recent_trades);
        let warm = self.history.recent(instrument, limit);
        if !warm.is_empty() {
            return Ok(warm);
        }
        self.store
            .recent_trades(instrument, limit)
            .await
            .map_err(store_err)
    }

    pub async fn get_positions(&self, client_id: &str) -> Result<Vec<Position>, ExchangeError> {
        self.store.positions(client_id).await.map_err(store_err)
    }

    // ========================================================================
    // Engine lifecycle
    // ========================================================================

    fn ensure_engine(&self, instrument: &str) -> EngineHandle {
        self.engines
            .entry(instrument.to_string())
            .or_insert_with(|| {
                InstrumentEngine::spawn(
                    OrderBook::new(instrument),
                    self.store.clone(),
                    self.publisher.clone(),
                    self.history.clone(),
                    self.config.engine_queue_depth,
                    self.config.book_depth,
                )
            })
            .clone()
    }

    /// Spawn an engine over a recovery-populated book. Replaces any engine
    /// already registered for the instrument.
    pub(crate) fn install_engine(&self, book: OrderBook) {
        let instrument = book.instrument().to_string();
        let handle = InstrumentEngine::spawn(
            book,
            self.store.clone(),
            self.publisher.clone(),
            self.history.clone(),
            self.config.engine_queue_depth,
            self.config.book_depth,
        );
        self.engines.insert(instrument, handle);
    }
}

fn store_err(e: StoreError) -> ExchangeError {
    ExchangeError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRecordStore;
    use crate::eventlog::MemoryEventLog;
    use crate::models::{OrderSide, OrderStatus, OrderType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Harness {
        coordinator: ExchangeCoordinator,
        store: Arc<MemoryRecordStore>,
        log: Arc<MemoryEventLog>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryRecordStore::new());
        let log = Arc::new(MemoryEventLog::new());
        let coordinator = ExchangeCoordinator::new(
            store.clone(),
            Arc::new(CacheManager::in_memory()),
            log.clone(),
            CoordinatorConfig::default(),
        );
        Harness {
            coordinator,
            store,
            log,
        }
    }

    fn limit(client: &str, side: OrderSide, price: Decimal, quantity: Decimal) -> OrderInput {
        OrderInput {
            order_id: None,
            client_id: client.to_string(),
            instrument: "BTC-USD".to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
        }
    }

    fn market(client: &str, side: OrderSide, quantity: Decimal) -> OrderInput {
        OrderInput {
            order_id: None,
            client_id: client.to_string(),
            instrument: "BTC-USD".to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_full_match_at_limit_price() {
        let h = harness();
        let a = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Sell, dec!(70000), dec!(1)), None)
            .await
            .unwrap();
        assert_eq!(a.order.status, OrderStatus::Open);

        let b = h
            .coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        assert_eq!(b.trades.len(), 1);
        assert_eq!(b.trades[0].price, dec!(70000));
        assert_eq!(b.trades[0].quantity, dec!(1));
        assert_eq!(b.trades[0].sell_order_id, a.order.id);
        assert_eq!(b.trades[0].buy_order_id, b.order.id);
        assert_eq!(b.order.status, OrderStatus::Filled);

        let a_final = h.coordinator.get_order(a.order.id).await.unwrap();
        assert_eq!(a_final.status, OrderStatus::Filled);

        assert!(b.book.bids.is_empty());
        assert!(b.book.asks.is_empty());
    }

    #[tokio::test]
    async fn test_partial_fill_rests_remainder() {
        let h = harness();
        let a = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Sell, dec!(70000), dec!(0.5)), None)
            .await
            .unwrap();
        let b = h
            .coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        assert_eq!(b.trades.len(), 1);
        assert_eq!(b.trades[0].quantity, dec!(0.5));

        let a_final = h.coordinator.get_order(a.order.id).await.unwrap();
        assert_eq!(a_final.status, OrderStatus::Filled);

        assert_eq!(b.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(b.order.filled_quantity, dec!(0.5));
        assert_eq!(b.order.remaining(), dec!(0.5));

        assert_eq!(b.book.best_bid(), Some(dec!(70000)));
        assert_eq!(b.book.bids[0].quantity, dec!(0.5));
    }

    #[tokio::test]
    async fn test_time_priority_at_same_price() {
        let h = harness();
        let a = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Sell, dec!(70000), dec!(1)), None)
            .await
            .unwrap();
        let b = h
            .coordinator
            .submit_order(limit("bob", OrderSide::Sell, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        let c = h
            .coordinator
            .submit_order(limit("carol", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        assert_eq!(c.trades.len(), 1);
        assert_eq!(c.trades[0].sell_order_id, a.order.id);
        assert_eq!(c.order.status, OrderStatus::Filled);

        let a_final = h.coordinator.get_order(a.order.id).await.unwrap();
        assert_eq!(a_final.status, OrderStatus::Filled);
        let b_final = h.coordinator.get_order(b.order.id).await.unwrap();
        assert_eq!(b_final.status, OrderStatus::Open);
        assert_eq!(c.book.best_ask(), Some(dec!(70000)));
    }

    #[tokio::test]
    async fn test_market_order_walks_the_ladder() {
        let h = harness();
        for (price, qty) in [(dec!(70000), dec!(0.3)), (dec!(70100), dec!(0.3)), (dec!(70200), dec!(0.3))] {
            h.coordinator
                .submit_order(limit("maker", OrderSide::Sell, price, qty), None)
                .await
                .unwrap();
        }

        let result = h
            .coordinator
            .submit_order(market("taker", OrderSide::Buy, dec!(0.7)), None)
            .await
            .unwrap();

        let expected = [
            (dec!(70000), dec!(0.3)),
            (dec!(70100), dec!(0.3)),
            (dec!(70200), dec!(0.1)),
        ];
        assert_eq!(result.trades.len(), 3);
        for (trade, (price, qty)) in result.trades.iter().zip(expected) {
            assert_eq!(trade.price, price);
            assert_eq!(trade.quantity, qty);
        }
        assert_eq!(result.order.status, OrderStatus::Filled);
        assert_eq!(result.book.best_ask(), Some(dec!(70200)));
        assert_eq!(result.book.asks[0].quantity, dec!(0.2));
    }

    #[tokio::test]
    async fn test_market_order_insufficient_liquidity() {
        let h = harness();
        h.coordinator
            .submit_order(limit("maker", OrderSide::Sell, dec!(70000), dec!(0.5)), None)
            .await
            .unwrap();

        let result = h
            .coordinator
            .submit_order(market("taker", OrderSide::Buy, dec!(1)), None)
            .await
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].quantity, dec!(0.5));
        assert_eq!(result.order.status, OrderStatus::Rejected);
        assert_eq!(result.order.filled_quantity, dec!(0.5));
        assert!(result.book.asks.is_empty());

        // the rejected remainder never rests and the fills stay durable
        let stored = h.coordinator.get_order(result.order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Rejected);
        assert_eq!(stored.filled_quantity, dec!(0.5));
    }

    #[tokio::test]
    async fn test_idempotent_submission() {
        let h = harness();
        let first = h
            .coordinator
            .submit_order(
                limit("alice", OrderSide::Buy, dec!(70000), dec!(1)),
                Some("K".to_string()),
            )
            .await
            .unwrap();
        let trades_before = h.store.trade_count();
        let events_before = h.store.event_count();
        let log_before = h.log.len();

        let second = h
            .coordinator
            .submit_order(
                limit("alice", OrderSide::Buy, dec!(70000), dec!(1)),
                Some("K".to_string()),
            )
            .await
            .unwrap();

        assert!(second.idempotent_replay);
        assert_eq!(second.order.id, first.order.id);
        assert_eq!(h.store.trade_count(), trades_before);
        assert_eq!(h.store.event_count(), events_before);
        assert_eq!(h.log.len(), log_before);
    }

    #[tokio::test]
    async fn test_idempotency_survives_cache_loss() {
        // cold cache, key already durable on the order row
        let h = harness();
        let first = h
            .coordinator
            .submit_order(
                limit("alice", OrderSide::Buy, dec!(70000), dec!(1)),
                Some("K".to_string()),
            )
            .await
            .unwrap();

        let fresh_cache = ExchangeCoordinator::new(
            h.store.clone(),
            Arc::new(CacheManager::in_memory()),
            h.log.clone(),
            CoordinatorConfig::default(),
        );
        let second = fresh_cache
            .submit_order(
                limit("alice", OrderSide::Buy, dec!(70000), dec!(1)),
                Some("K".to_string()),
            )
            .await
            .unwrap();

        assert!(second.idempotent_replay);
        assert_eq!(second.order.id, first.order.id);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = harness();
        let submitted = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        let first = h
            .coordinator
            .cancel_order(submitted.order.id, Some("BTC-USD"))
            .await
            .unwrap();
        assert_eq!(first.status, OrderStatus::Cancelled);
        let events_after_first = h.store.event_count();

        let second = h
            .coordinator
            .cancel_order(submitted.order.id, Some("BTC-USD"))
            .await
            .unwrap();
        assert_eq!(second.status, OrderStatus::Cancelled);
        assert_eq!(second.id, first.id);
        assert_eq!(h.store.event_count(), events_after_first);

        // cancelled order no longer rests
        let book = h.coordinator.get_book("BTC-USD", 10).await.unwrap();
        assert!(book.bids.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let h = harness();
        let err = h
            .coordinator
            .cancel_order(Uuid::new_v4(), Some("BTC-USD"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::NotFoundOrTerminal(_)));
    }

    #[tokio::test]
    async fn test_cancel_without_instrument_hint() {
        let h = harness();
        let submitted = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        let cancelled = h
            .coordinator
            .cancel_order(submitted.order.id, None)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_blocks_later_matches() {
        let h = harness();
        let resting = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Sell, dec!(70000), dec!(1)), None)
            .await
            .unwrap();
        h.coordinator
            .cancel_order(resting.order.id, Some("BTC-USD"))
            .await
            .unwrap();

        let taker = h
            .coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();
        assert!(taker.trades.is_empty());
        assert_eq!(taker.order.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_submit_then_get_round_trip() {
        let h = harness();
        let submitted = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        let fetched = h.coordinator.get_order(submitted.order.id).await.unwrap();
        assert_eq!(fetched.id, submitted.order.id);
        assert_eq!(fetched.status, submitted.order.status);
        assert_eq!(fetched.filled_quantity, submitted.order.filled_quantity);
    }

    #[tokio::test]
    async fn test_positions_conserve_quantity() {
        let h = harness();
        h.coordinator
            .submit_order(limit("alice", OrderSide::Sell, dec!(70000), dec!(2)), None)
            .await
            .unwrap();
        h.coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(1.5)), None)
            .await
            .unwrap();
        h.coordinator
            .submit_order(market("carol", OrderSide::Buy, dec!(0.5)), None)
            .await
            .unwrap();

        let total: Decimal = h
            .store
            .all_positions()
            .iter()
            .map(|p| p.net_quantity)
            .sum();
        assert_eq!(total, dec!(0));

        let alice = h.coordinator.get_positions("alice").await.unwrap();
        assert_eq!(alice[0].net_quantity, dec!(-2));
        assert_eq!(alice[0].total_cost, dec!(-140000));
    }

    #[tokio::test]
    async fn test_order_events_form_a_lifecycle() {
        let h = harness();
        let a = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Sell, dec!(70000), dec!(1)), None)
            .await
            .unwrap();
        h.coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(0.4)), None)
            .await
            .unwrap();
        h.coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(0.6)), None)
            .await
            .unwrap();

        let events = h.store.events_for(a.order.id);
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                OrderEventType::Created,
                OrderEventType::PartiallyFilled,
                OrderEventType::Filled,
            ]
        );
        // event ids are monotonic along the lifecycle
        assert!(events.windows(2).all(|w| w[0].event_id < w[1].event_id));
    }

    #[tokio::test]
    async fn test_recent_trades_served_from_memory() {
        let h = harness();
        h.coordinator
            .submit_order(limit("alice", OrderSide::Sell, dec!(70000), dec!(1)), None)
            .await
            .unwrap();
        h.coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        let trades = h
            .coordinator
            .get_recent_trades("BTC-USD", 10)
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(70000));
    }

    #[tokio::test]
    async fn test_request_snapshot_persists_and_returns() {
        let h = harness();
        h.coordinator
            .submit_order(limit("alice", OrderSide::Buy, dec!(69000), dec!(1)), None)
            .await
            .unwrap();

        let snapshot = h.coordinator.request_snapshot("BTC-USD").await.unwrap();
        assert_eq!(snapshot.best_bid(), Some(dec!(69000)));
        assert_eq!(h.store.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_persisting() {
        let h = harness();
        let err = h
            .coordinator
            .submit_order(limit("alice", OrderSide::Buy, dec!(0), dec!(1)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Validation(_)));
        assert_eq!(h.store.event_count(), 0);
    }

    #[tokio::test]
    async fn test_instruments_run_independently() {
        let h = harness();
        let mut eth = limit("alice", OrderSide::Sell, dec!(3500), dec!(2));
        eth.instrument = "ETH-USD".to_string();
        h.coordinator.submit_order(eth, None).await.unwrap();
        h.coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        let btc = h.coordinator.get_book("BTC-USD", 10).await.unwrap();
        let eth = h.coordinator.get_book("ETH-USD", 10).await.unwrap();
        assert_eq!(btc.best_bid(), Some(dec!(70000)));
        assert!(btc.asks.is_empty());
        assert_eq!(eth.best_ask(), Some(dec!(3500)));

        let mut names = h.coordinator.instruments();
        names.sort();
        assert_eq!(names, vec!["BTC-USD", "ETH-USD"]);
    }

    #[tokio::test]
    async fn test_trade_broadcast_reaches_subscribers() {
        let h = harness();
        let mut trades = h.coordinator.publisher().subscribe_trades();

        h.coordinator
            .submit_order(limit("alice", OrderSide::Sell, dec!(70000), dec!(1)), None)
            .await
            .unwrap();
        h.coordinator
            .submit_order(limit("bob", OrderSide::Buy, dec!(70000), dec!(1)), None)
            .await
            .unwrap();

        let trade = trades.recv().await.unwrap();
        assert_eq!(trade.price, dec!(70000));
        assert_eq!(trade.quantity, dec!(1));
    }
}
