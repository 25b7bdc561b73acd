//! Cold-start recovery
//!
//! Rebuilds the in-memory books from the record store alone: the event log
//! and snapshots are derived data and are never consulted. Because trades
//! persist atomically with the orders' filled_quantity, the post-state is
//! already on the order rows and no trade replay is needed.

use std::collections::HashMap;

use super::coordinator::ExchangeCoordinator;
use super::orderbook::OrderBook;
use super::types::ExchangeError;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub instruments: usize,
    pub orders_restored: usize,
}

/// Rehydrate engines for every instrument that still has open orders.
///
/// Orders arrive ordered by `created_at` ascending, so straight insertion
/// reproduces time priority.
pub async fn recover(coordinator: &ExchangeCoordinator) -> Result<RecoveryReport, ExchangeError> {
    let store = coordinator.store();
    store
        .ready()
        .await
        .map_err(|e| ExchangeError::Store(format!("store not ready: {}", e)))?;

    let open = store
        .open_orders()
        .await
        .map_err(|e| ExchangeError::Store(e.to_string()))?;

    let mut books: Vec<OrderBook> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut restored = 0usize;

    for order in open {
        if !order.is_active() {
            tracing::warn!(
                order_id = %order.id,
                status = %order.status,
                "skipping non-restorable order during recovery"
            );
            continue;
        }
        let slot = *index.entry(order.instrument.clone()).or_insert_with(|| {
            books.push(OrderBook::new(order.instrument.clone()));
            books.len() - 1
        });
        books[slot].insert(order);
        restored += 1;
    }

    let report = RecoveryReport {
        instruments: books.len(),
        orders_restored: restored,
    };

    for book in books {
        tracing::info!(
            instrument = %book.instrument(),
            orders = book.order_count(),
            "restored order book"
        );
        coordinator.install_engine(book);
    }

    metrics::record_recovered_orders(report.orders_restored as u64);
    tracing::info!(
        instruments = report.instruments,
        orders = report.orders_restored,
        "recovery complete"
    );
    Ok(report)
}
