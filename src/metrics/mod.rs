//! Metrics Module
//!
//! Metric recording for the matching core via the `metrics` facade:
//! - order flow (submitted, cancelled, rejected)
//! - trades (count, match duration)
//! - snapshots and recovery
//!
//! Exporter wiring is the embedding service's concern; with no recorder
//! installed these calls are no-ops.

use metrics::{counter, histogram};

/// Metric names as constants for consistency
pub mod names {
    pub const ORDERS_SUBMITTED_TOTAL: &str = "orders_submitted_total";
    pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
    pub const ORDERS_REJECTED_TOTAL: &str = "orders_rejected_total";
    pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "idempotent_replays_total";

    pub const TRADES_EXECUTED_TOTAL: &str = "trades_executed_total";
    pub const ORDER_MATCH_DURATION_SECONDS: &str = "order_match_duration_seconds";

    pub const SNAPSHOTS_CAPTURED_TOTAL: &str = "snapshots_captured_total";
    pub const ORDERS_RECOVERED_TOTAL: &str = "orders_recovered_total";
}

/// Label keys
pub mod labels {
    pub const INSTRUMENT: &str = "instrument";
    pub const ORDER_SIDE: &str = "side";
    pub const ORDER_TYPE: &str = "order_type";
}

/// Record an accepted submission
pub fn record_order_submitted(instrument: &str, side: &str, order_type: &str) {
    counter!(
        names::ORDERS_SUBMITTED_TOTAL,
        labels::INSTRUMENT => instrument.to_string(),
        labels::ORDER_SIDE => side.to_string(),
        labels::ORDER_TYPE => order_type.to_string()
    )
    .increment(1);
}

/// Record a cancellation
pub fn record_order_cancelled(instrument: &str) {
    counter!(
        names::ORDERS_CANCELLED_TOTAL,
        labels::INSTRUMENT => instrument.to_string()
    )
    .increment(1);
}

/// Record a market-order liquidity rejection
pub fn record_order_rejected(instrument: &str) {
    counter!(
        names::ORDERS_REJECTED_TOTAL,
        labels::INSTRUMENT => instrument.to_string()
    )
    .increment(1);
}

/// Record an idempotency-key replay
pub fn record_idempotent_replay() {
    counter!(names::IDEMPOTENT_REPLAYS_TOTAL).increment(1);
}

/// Record executed trades and how long the match took
pub fn record_match(instrument: &str, trade_count: usize, duration_secs: f64) {
    if trade_count > 0 {
        counter!(
            names::TRADES_EXECUTED_TOTAL,
            labels::INSTRUMENT => instrument.to_string()
        )
        .increment(trade_count as u64);
    }
    histogram!(
        names::ORDER_MATCH_DURATION_SECONDS,
        labels::INSTRUMENT => instrument.to_string()
    )
    .record(duration_secs);
}

/// Record a captured book snapshot
pub fn record_snapshot(instrument: &str) {
    counter!(
        names::SNAPSHOTS_CAPTURED_TOTAL,
        labels::INSTRUMENT => instrument.to_string()
    )
    .increment(1);
}

/// Record orders restored during recovery
pub fn record_recovered_orders(count: u64) {
    counter!(names::ORDERS_RECOVERED_TOTAL).increment(count);
}
