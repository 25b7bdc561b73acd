//! Cache key and channel naming scheme
//!
//! Every Redis key or pub/sub channel name this system touches is built
//! here, so the layout stays greppable in one place.

pub struct CacheKey;

impl CacheKey {
    /// Idempotency mapping: key -> order id.
    pub fn idempotency(key: &str) -> String {
        format!("idem:{}", key)
    }

    /// Per-instrument trade feed.
    pub fn channel_trades(instrument: &str) -> String {
        format!("trades:{}", instrument)
    }

    /// Per-instrument order lifecycle feed.
    pub fn channel_orders(instrument: &str) -> String {
        format!("orders:{}", instrument)
    }

    /// Per-instrument book depth feed.
    pub fn channel_orderbook(instrument: &str) -> String {
        format!("orderbook:{}", instrument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(CacheKey::idempotency("K"), "idem:K");
        assert_eq!(CacheKey::channel_trades("BTC-USD"), "trades:BTC-USD");
        assert_eq!(CacheKey::channel_orders("BTC-USD"), "orders:BTC-USD");
        assert_eq!(CacheKey::channel_orderbook("BTC-USD"), "orderbook:BTC-USD");
    }
}
