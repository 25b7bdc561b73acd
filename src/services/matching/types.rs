//! Matching Engine Types
//!
//! Shared types and DTOs for the matching engine and coordinator.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::models::{Order, Trade};

// ============================================================================
// Price Key
// ============================================================================

/// Ladder key with 8 decimal digits of fixed-point precision, so level
/// lookups and crossing comparisons are exact integer comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceKey(i64);

const PRICE_SCALE: i64 = 100_000_000;

impl PriceKey {
    /// Create a PriceKey from a Decimal price.
    ///
    /// Validation upstream guarantees at most 8 fractional digits, so the
    /// scaling below is lossless.
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = (price * Decimal::from(PRICE_SCALE)).trunc();
        let value = scaled.mantissa() / 10i128.pow(scaled.scale());
        PriceKey(value as i64)
    }

    /// Convert back to Decimal.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(PRICE_SCALE)
    }

    /// Get raw value.
    pub fn raw(&self) -> i64 {
        self.0
    }
}

impl Ord for PriceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Book Snapshot
// ============================================================================

/// One aggregated ladder row: total resting quantity at the price plus the
/// running cumulative from the top of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub cumulative: Decimal,
}

/// Top-N aggregated view of one book. Advisory; the event stream is
/// authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub instrument: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: i64,
}

impl BookSnapshot {
    pub fn empty(instrument: &str) -> BookSnapshot {
        BookSnapshot {
            instrument: instrument.to_string(),
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

// ============================================================================
// Engine Outcomes
// ============================================================================

/// What a submit produced inside the engine: the taker's post-state, the
/// trades in execution order, and the book as it stood when the command
/// finished (captured before the engine moves on, so it is the atomic
/// post-match state).
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub order: Order,
    pub trades: Vec<Trade>,
    pub book: BookSnapshot,
}

/// Coordinator response to a submission: final order state, trades produced,
/// and the post-match top-of-book.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub order: Order,
    pub trades: Vec<Trade>,
    pub book: BookSnapshot,
    /// True when an idempotency key resolved to a previously accepted order
    /// and no new submission took place.
    pub idempotent_replay: bool,
}

// ============================================================================
// Error Types
// ============================================================================

/// Coordinator-surface error taxonomy.
///
/// Insufficient liquidity is not an `Err`: the market order comes back with
/// terminal `rejected` status and its partial fills retained. Invariant
/// violations inside the engine panic rather than propagate.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("order {0} not found or already terminal")]
    NotFoundOrTerminal(Uuid),

    #[error("persistence failed after retries: {0}")]
    Store(String),

    #[error("engine unavailable for {0}")]
    EngineUnavailable(String),
}
