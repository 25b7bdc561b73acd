use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::services::matching::ExchangeError;

// Helper module to serialize DateTime as milliseconds timestamp
mod datetime_as_millis {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp_millis())
    }
}

/// Maximum fractional digits accepted on prices and quantities.
pub const MAX_DECIMAL_SCALE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::PartiallyFilled => write!(f, "partially_filled"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A client order as persisted in the record store and, while resting,
/// held in the order book.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub client_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub idempotency_key: Option<String>,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Whether the order is eligible to rest in a book.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Open | OrderStatus::PartiallyFilled
        ) && self.remaining() > Decimal::ZERO
    }

    /// Apply a fill of `quantity`, moving the status along
    /// open -> partially_filled -> filled.
    ///
    /// Panics if the fill overshoots the remaining quantity; that is an
    /// engine invariant violation, not a recoverable condition.
    pub fn apply_fill(&mut self, quantity: Decimal, at: DateTime<Utc>) {
        assert!(
            quantity > Decimal::ZERO && quantity <= self.remaining(),
            "fill {} exceeds remaining {} on order {}",
            quantity,
            self.remaining(),
            self.id
        );
        self.filled_quantity += quantity;
        self.status = if self.filled_quantity == self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = at;
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) {
        self.status = OrderStatus::Cancelled;
        self.updated_at = at;
    }

    /// Market-order remainder past available liquidity. Fills already
    /// applied stay on the order.
    pub fn reject(&mut self, at: DateTime<Utc>) {
        self.status = OrderStatus::Rejected;
        self.updated_at = at;
    }
}

/// Submission payload, before an order id or timestamps exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInput {
    pub order_id: Option<Uuid>,
    pub client_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

impl OrderInput {
    /// Validate the submission rules: quantity strictly positive, price
    /// present iff limit and strictly positive, both within 8 fractional
    /// digits, instrument and client non-empty.
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.instrument.trim().is_empty() {
            return Err(ExchangeError::Validation("instrument is required".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(ExchangeError::Validation("client_id is required".into()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Validation(
                "quantity must be strictly positive".into(),
            ));
        }
        if self.quantity.normalize().scale() > MAX_DECIMAL_SCALE {
            return Err(ExchangeError::Validation(format!(
                "quantity exceeds {} fractional digits",
                MAX_DECIMAL_SCALE
            )));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => {
                return Err(ExchangeError::Validation(
                    "limit orders require a price".into(),
                ));
            }
            (OrderType::Market, Some(_)) => {
                return Err(ExchangeError::Validation(
                    "market orders must not carry a price".into(),
                ));
            }
            (OrderType::Limit, Some(price)) => {
                if price <= Decimal::ZERO {
                    return Err(ExchangeError::Validation(
                        "price must be strictly positive".into(),
                    ));
                }
                if price.normalize().scale() > MAX_DECIMAL_SCALE {
                    return Err(ExchangeError::Validation(format!(
                        "price exceeds {} fractional digits",
                        MAX_DECIMAL_SCALE
                    )));
                }
            }
            (OrderType::Market, None) => {}
        }
        Ok(())
    }

    /// Materialize an open order, assigning an id when the client did not
    /// supply one.
    pub fn into_order(self, idempotency_key: Option<String>, at: DateTime<Utc>) -> Order {
        Order {
            id: self.order_id.unwrap_or_else(Uuid::new_v4),
            client_id: self.client_id,
            instrument: self.instrument,
            side: self.side,
            order_type: self.order_type,
            price: self.price,
            quantity: self.quantity,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Open,
            idempotency_key,
            created_at: at,
            updated_at: at,
        }
    }
}
