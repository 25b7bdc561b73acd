use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::order::{Order, OrderSide};

/// An executed match. Immutable once created; the price is always the
/// resting (maker) order's price.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub instrument: String,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Build a trade from a taker/maker pair, attributing the buy and sell
    /// legs by the orders' sides rather than their roles.
    pub fn between(
        taker: &Order,
        maker: &Order,
        price: Decimal,
        quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Trade {
        debug_assert_eq!(taker.instrument, maker.instrument);
        debug_assert_ne!(taker.side, maker.side);
        let (buy_order_id, sell_order_id) = match taker.side {
            OrderSide::Buy => (taker.id, maker.id),
            OrderSide::Sell => (maker.id, taker.id),
        };
        Trade {
            id: Uuid::new_v4(),
            instrument: taker.instrument.clone(),
            buy_order_id,
            sell_order_id,
            price,
            quantity,
            executed_at: at,
        }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}
