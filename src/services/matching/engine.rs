//! Per-instrument matching engine
//!
//! One tokio task owns one instrument's book and drains a bounded command
//! queue, so at most one command ever executes against the book and no
//! mid-match state is observable. Persistence and publication for a command
//! complete before the next command is taken, which makes acceptance order,
//! match order, persistence order and publication order identical within an
//! instrument.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::history::TradeHistory;
use super::orderbook::OrderBook;
use super::publisher::EventPublisher;
use super::types::{BookSnapshot, ExchangeError, MatchOutcome};
use crate::db::RecordStore;
use crate::models::{Order, OrderEventType, OrderSide, OrderType, Trade};

pub enum EngineCommand {
    Submit {
        order: Order,
        reply: oneshot::Sender<MatchOutcome>,
    },
    Cancel {
        order_id: Uuid,
        reply: oneshot::Sender<Option<Order>>,
    },
    Snapshot {
        levels: usize,
        reply: oneshot::Sender<BookSnapshot>,
    },
}

/// Sender half of an engine's command queue. Cloneable; all clones feed the
/// same serialized task.
#[derive(Clone)]
pub struct EngineHandle {
    instrument: String,
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub async fn submit(&self, order: Order) -> Result<MatchOutcome, ExchangeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Submit { order, reply })
            .await
            .map_err(|_| ExchangeError::EngineUnavailable(self.instrument.clone()))?;
        rx.await
            .map_err(|_| ExchangeError::EngineUnavailable(self.instrument.clone()))
    }

    pub async fn cancel(&self, order_id: Uuid) -> Result<Option<Order>, ExchangeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Cancel { order_id, reply })
            .await
            .map_err(|_| ExchangeError::EngineUnavailable(self.instrument.clone()))?;
        rx.await
            .map_err(|_| ExchangeError::EngineUnavailable(self.instrument.clone()))
    }

    pub async fn snapshot(&self, levels: usize) -> Result<BookSnapshot, ExchangeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Snapshot { levels, reply })
            .await
            .map_err(|_| ExchangeError::EngineUnavailable(self.instrument.clone()))?;
        rx.await
            .map_err(|_| ExchangeError::EngineUnavailable(self.instrument.clone()))
    }
}

pub struct InstrumentEngine {
    book: OrderBook,
    store: Arc<dyn RecordStore>,
    publisher: Arc<EventPublisher>,
    history: Arc<TradeHistory>,
    result_depth: usize,
}

impl InstrumentEngine {
    /// Spawn the engine task over a (possibly recovery-populated) book and
    /// hand back the queue sender.
    pub fn spawn(
        book: OrderBook,
        store: Arc<dyn RecordStore>,
        publisher: Arc<EventPublisher>,
        history: Arc<TradeHistory>,
        queue_depth: usize,
        result_depth: usize,
    ) -> EngineHandle {
        let instrument = book.instrument().to_string();
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let engine = InstrumentEngine {
            book,
            store,
            publisher,
            history,
            result_depth,
        };
        tokio::spawn(engine.run(rx));
        EngineHandle { instrument, tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<EngineCommand>) {
        tracing::info!(instrument = %self.book.instrument(), "engine started");
        while let Some(command) = rx.recv().await {
            match command {
                EngineCommand::Submit { order, reply } => {
                    let outcome = self.handle_submit(order).await;
                    let _ = reply.send(outcome);
                }
                EngineCommand::Cancel { order_id, reply } => {
                    let cancelled = self.handle_cancel(order_id).await;
                    let _ = reply.send(cancelled);
                }
                EngineCommand::Snapshot { levels, reply } => {
                    let _ = reply.send(self.book.snapshot(levels));
                }
            }
        }
        tracing::info!(instrument = %self.book.instrument(), "engine stopped");
    }

    /// Match an incoming order against the book under price-time priority.
    async fn handle_submit(&mut self, order: Order) -> MatchOutcome {
        let now = Utc::now();
        let mut taker = order;
        let mut trades: Vec<Trade> = Vec::new();
        let opposite = taker.side.opposite();

        while taker.remaining() > Decimal::ZERO {
            let (maker_price, maker_remaining) = match self.book.peek_best(opposite) {
                Some(maker) => (
                    maker.price.expect("resting order without price"),
                    maker.remaining(),
                ),
                None => break,
            };

            if taker.order_type == OrderType::Limit {
                let limit = taker.price.expect("limit order without price");
                let crosses = match taker.side {
                    OrderSide::Buy => maker_price <= limit,
                    OrderSide::Sell => maker_price >= limit,
                };
                if !crosses {
                    break;
                }
            }

            // the taker pays/receives the maker's price
            let quantity = taker.remaining().min(maker_remaining);
            taker.apply_fill(quantity, now);
            let maker = self.book.fill_best(opposite, quantity, now);
            let trade = Trade::between(&taker, &maker, maker_price, quantity, now);

            let (buy_order, sell_order) = match taker.side {
                OrderSide::Buy => (&taker, &maker),
                OrderSide::Sell => (&maker, &taker),
            };

            // The in-memory match is authoritative; a persistence failure
            // after retries is logged and the durable record catches up.
            if let Err(e) = self
                .store
                .persist_execution(&trade, buy_order, sell_order)
                .await
            {
                tracing::error!(
                    trade_id = %trade.id,
                    instrument = %trade.instrument,
                    "failed to persist execution: {}",
                    e
                );
            }

            self.history.record(&trade);
            self.publisher.trade_event(&trade).await;
            self.emit_fill_event(&taker).await;
            self.emit_fill_event(&maker).await;

            tracing::debug!(
                trade_id = %trade.id,
                instrument = %trade.instrument,
                price = %trade.price,
                quantity = %trade.quantity,
                "trade executed"
            );
            trades.push(trade);
        }

        if taker.remaining() > Decimal::ZERO {
            match taker.order_type {
                OrderType::Limit => {
                    // remainder rests at its own price
                    self.book.insert(taker.clone());
                }
                OrderType::Market => {
                    // the unfilled portion never rests; fills stay recorded
                    taker.reject(now);
                    tracing::warn!(
                        order_id = %taker.id,
                        filled = %taker.filled_quantity,
                        "market order rejected: insufficient liquidity"
                    );
                    if let Err(e) = self.store.update_order(&taker).await {
                        tracing::error!(order_id = %taker.id, "failed to persist reject: {}", e);
                    }
                    self.publisher
                        .order_event(&taker, OrderEventType::Rejected)
                        .await;
                }
            }
        }

        MatchOutcome {
            book: self.book.snapshot(self.result_depth),
            order: taker,
            trades,
        }
    }

    async fn emit_fill_event(&self, order: &Order) {
        if let Some(event_type) = OrderEventType::from_status(order.status) {
            self.publisher.order_event(order, event_type).await;
        }
    }

    /// Remove a resting order. `None` means the order is not in this book —
    /// the coordinator decides whether that is terminal or unknown.
    async fn handle_cancel(&mut self, order_id: Uuid) -> Option<Order> {
        let mut order = self.book.remove(&order_id)?;
        order.cancel(Utc::now());

        if let Err(e) = self.store.update_order(&order).await {
            tracing::error!(order_id = %order.id, "failed to persist cancel: {}", e);
        }
        self.publisher
            .order_event(&order, OrderEventType::Cancelled)
            .await;

        tracing::info!(order_id = %order.id, instrument = %order.instrument, "order cancelled");
        Some(order)
    }
}
