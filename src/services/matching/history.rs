//! Recent-trade history
//!
//! Bounded per-instrument ring buffers so `get_recent_trades` is served
//! from memory; the record store remains the fallback for anything older.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::models::Trade;

pub struct TradeHistory {
    capacity: usize,
    buffers: DashMap<String, Mutex<VecDeque<Trade>>>,
}

impl TradeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: DashMap::new(),
        }
    }

    pub fn record(&self, trade: &Trade) {
        let buffer = self
            .buffers
            .entry(trade.instrument.clone())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.capacity)));
        let mut buffer = buffer.lock();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(trade.clone());
    }

    /// Most recent trades first, at most `limit`.
    pub fn recent(&self, instrument: &str, limit: usize) -> Vec<Trade> {
        match self.buffers.get(instrument) {
            Some(buffer) => buffer.lock().iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.buffers.get(instrument).map_or(0, |b| b.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn trade(instrument: &str, price: rust_decimal::Decimal) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            buy_order_id: Uuid::new_v4(),
            sell_order_id: Uuid::new_v4(),
            price,
            quantity: dec!(1),
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_recent_returns_newest_first() {
        let history = TradeHistory::new(10);
        history.record(&trade("BTC-USD", dec!(1)));
        history.record(&trade("BTC-USD", dec!(2)));
        history.record(&trade("BTC-USD", dec!(3)));

        let recent = history.recent("BTC-USD", 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].price, dec!(3));
        assert_eq!(recent[1].price, dec!(2));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let history = TradeHistory::new(2);
        history.record(&trade("BTC-USD", dec!(1)));
        history.record(&trade("BTC-USD", dec!(2)));
        history.record(&trade("BTC-USD", dec!(3)));

        assert_eq!(history.len("BTC-USD"), 2);
        let recent = history.recent("BTC-USD", 10);
        assert_eq!(recent[1].price, dec!(2));
    }

    #[test]
    fn test_instruments_are_isolated() {
        let history = TradeHistory::new(10);
        history.record(&trade("BTC-USD", dec!(1)));
        assert!(history.recent("ETH-USD", 10).is_empty());
    }
}
