//! Orderbook Implementation
//!
//! Price-indexed storage of resting orders. The book is owned by its
//! instrument's engine task; all access is serialized there, so the
//! structure itself carries no locks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

use super::types::{BookLevel, BookSnapshot, PriceKey};
use crate::models::{Order, OrderSide};

/// A single instrument's order book: two price ladders plus an id index for
/// O(1) cancellation.
pub struct OrderBook {
    instrument: String,

    /// Bids keyed ascending; best bid is the last key.
    bids: BTreeMap<PriceKey, VecDeque<Order>>,

    /// Asks keyed ascending; best ask is the first key.
    asks: BTreeMap<PriceKey, VecDeque<Order>>,

    /// order_id -> (side, price key). The only back-pointer from an order
    /// to its level; owned exclusively by the book.
    index: HashMap<Uuid, (OrderSide, PriceKey)>,
}

impl OrderBook {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, order_id: &Uuid) -> bool {
        self.index.contains_key(order_id)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().map(|k| k.to_decimal())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().map(|k| k.to_decimal())
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Insert a resting order at the tail of its price level, creating the
    /// level if absent.
    ///
    /// Panics if the order is not active, priceless, already present, or
    /// would cross the opposite side; matching must have consumed crossing
    /// quantity before anything rests.
    pub fn insert(&mut self, order: Order) {
        assert!(order.is_active(), "inactive order {} cannot rest", order.id);
        assert!(
            !self.index.contains_key(&order.id),
            "order {} already in book",
            order.id
        );
        let price = order
            .price
            .unwrap_or_else(|| panic!("priceless order {} cannot rest", order.id));
        let key = PriceKey::from_decimal(price);

        match order.side {
            OrderSide::Buy => {
                debug_assert!(
                    self.best_ask().map_or(true, |ask| price < ask),
                    "bid {} would cross ask book",
                    price
                );
                self.bids.entry(key).or_default().push_back(order.clone());
            }
            OrderSide::Sell => {
                debug_assert!(
                    self.best_bid().map_or(true, |bid| price > bid),
                    "ask {} would cross bid book",
                    price
                );
                self.asks.entry(key).or_default().push_back(order.clone());
            }
        }
        self.index.insert(order.id, (order.side, key));
    }

    /// Remove an order by id, dropping its level if it becomes empty.
    pub fn remove(&mut self, order_id: &Uuid) -> Option<Order> {
        let (side, key) = self.index.remove(order_id)?;
        let ladder = self.ladder_mut(side);

        let queue = ladder.get_mut(&key)?;
        let pos = queue.iter().position(|o| o.id == *order_id)?;
        let order = queue.remove(pos);
        if queue.is_empty() {
            ladder.remove(&key);
        }
        order
    }

    /// Head order of the best level on `side`, respecting time priority
    /// within the level.
    pub fn peek_best(&self, side: OrderSide) -> Option<&Order> {
        match side {
            OrderSide::Buy => self.bids.values().next_back()?.front(),
            OrderSide::Sell => self.asks.values().next()?.front(),
        }
    }

    /// Apply a fill to the head order of the best level on `side`,
    /// removing it (and an emptied level) when fully filled. Returns the
    /// maker's post-fill state.
    ///
    /// Panics when the side is empty; callers peek before filling.
    pub fn fill_best(&mut self, side: OrderSide, quantity: Decimal, at: DateTime<Utc>) -> Order {
        let ladder = self.ladder_mut(side);
        let (key, queue) = match side {
            OrderSide::Buy => ladder.iter_mut().next_back(),
            OrderSide::Sell => ladder.iter_mut().next(),
        }
        .expect("fill_best on empty side");
        let key = *key;

        let maker = queue.front_mut().expect("level without orders");
        maker.apply_fill(quantity, at);
        let snapshot = maker.clone();

        if snapshot.remaining() == Decimal::ZERO {
            queue.pop_front();
            let level_empty = queue.is_empty();
            self.index.remove(&snapshot.id);
            if level_empty {
                self.ladder_mut(side).remove(&key);
            }
        }
        snapshot
    }

    /// Aggregated top-N view: per level the summed remaining quantity and a
    /// running cumulative from the top of the book.
    pub fn snapshot(&self, levels: usize) -> BookSnapshot {
        fn aggregate<'a>(
            iter: impl Iterator<Item = (&'a PriceKey, &'a VecDeque<Order>)>,
            levels: usize,
        ) -> Vec<BookLevel> {
            let mut cumulative = Decimal::ZERO;
            iter.take(levels)
                .map(|(key, orders)| {
                    let quantity: Decimal = orders.iter().map(|o| o.remaining()).sum();
                    cumulative += quantity;
                    BookLevel {
                        price: key.to_decimal(),
                        quantity,
                        cumulative,
                    }
                })
                .collect()
        }

        BookSnapshot {
            instrument: self.instrument.clone(),
            bids: aggregate(self.bids.iter().rev(), levels),
            asks: aggregate(self.asks.iter(), levels),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn ladder_mut(&mut self, side: OrderSide) -> &mut BTreeMap<PriceKey, VecDeque<Order>> {
        match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderInput, OrderType};
    use rust_decimal_macros::dec;

    fn resting(side: OrderSide, price: Decimal, quantity: Decimal) -> Order {
        OrderInput {
            order_id: None,
            client_id: "c1".to_string(),
            instrument: "BTC-USD".to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
        }
        .into_order(None, Utc::now())
    }

    #[test]
    fn test_insert_and_remove() {
        let mut book = OrderBook::new("BTC-USD");
        let order = resting(OrderSide::Buy, dec!(100), dec!(1));
        let id = order.id;

        book.insert(order);
        assert_eq!(book.order_count(), 1);
        assert!(book.contains(&id));

        let removed = book.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(book.is_empty());
        // the emptied level must be gone
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn test_best_of_side_and_spread() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(resting(OrderSide::Buy, dec!(100), dec!(1)));
        book.insert(resting(OrderSide::Buy, dec!(101), dec!(1)));
        book.insert(resting(OrderSide::Sell, dec!(103), dec!(1)));
        book.insert(resting(OrderSide::Sell, dec!(102), dec!(1)));

        assert_eq!(book.best_bid(), Some(dec!(101)));
        assert_eq!(book.best_ask(), Some(dec!(102)));
        assert_eq!(book.spread(), Some(dec!(1)));
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut book = OrderBook::new("BTC-USD");
        let first = resting(OrderSide::Sell, dec!(100), dec!(1));
        let second = resting(OrderSide::Sell, dec!(100), dec!(1));
        let first_id = first.id;

        book.insert(first);
        book.insert(second);
        assert_eq!(book.peek_best(OrderSide::Sell).unwrap().id, first_id);
    }

    #[test]
    fn test_fill_best_partial_then_full() {
        let mut book = OrderBook::new("BTC-USD");
        let maker = resting(OrderSide::Sell, dec!(100), dec!(1));
        let maker_id = maker.id;
        book.insert(maker);

        let after = book.fill_best(OrderSide::Sell, dec!(0.4), Utc::now());
        assert_eq!(after.remaining(), dec!(0.6));
        assert!(book.contains(&maker_id));

        let after = book.fill_best(OrderSide::Sell, dec!(0.6), Utc::now());
        assert_eq!(after.remaining(), dec!(0));
        assert!(!book.contains(&maker_id));
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn test_snapshot_aggregates_with_cumulative() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(resting(OrderSide::Buy, dec!(100), dec!(1)));
        book.insert(resting(OrderSide::Buy, dec!(100), dec!(2)));
        book.insert(resting(OrderSide::Buy, dec!(99), dec!(5)));
        book.insert(resting(OrderSide::Sell, dec!(102), dec!(1.5)));

        let snapshot = book.snapshot(10);
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.bids[0].price, dec!(100));
        assert_eq!(snapshot.bids[0].quantity, dec!(3));
        assert_eq!(snapshot.bids[0].cumulative, dec!(3));
        assert_eq!(snapshot.bids[1].price, dec!(99));
        assert_eq!(snapshot.bids[1].cumulative, dec!(8));
        assert_eq!(snapshot.asks[0].quantity, dec!(1.5));
    }

    #[test]
    fn test_snapshot_respects_depth() {
        let mut book = OrderBook::new("BTC-USD");
        for i in 0..5 {
            book.insert(resting(OrderSide::Sell, dec!(100) + Decimal::from(i), dec!(1)));
        }
        let snapshot = book.snapshot(3);
        assert_eq!(snapshot.asks.len(), 3);
        assert_eq!(snapshot.asks[0].price, dec!(100));
        assert_eq!(snapshot.asks[2].price, dec!(102));
    }
}
