use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::order::{Order, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventType {
    Created,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventType::Created => "created",
            OrderEventType::PartiallyFilled => "partially_filled",
            OrderEventType::Filled => "filled",
            OrderEventType::Cancelled => "cancelled",
            OrderEventType::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<OrderEventType> {
        match s {
            "created" => Some(OrderEventType::Created),
            "partially_filled" => Some(OrderEventType::PartiallyFilled),
            "filled" => Some(OrderEventType::Filled),
            "cancelled" => Some(OrderEventType::Cancelled),
            "rejected" => Some(OrderEventType::Rejected),
            _ => None,
        }
    }

    /// The event a status transition maps to. `Created` is emitted
    /// separately on submission, never from a transition.
    pub fn from_status(status: OrderStatus) -> Option<OrderEventType> {
        match status {
            OrderStatus::Open => None,
            OrderStatus::PartiallyFilled => Some(OrderEventType::PartiallyFilled),
            OrderStatus::Filled => Some(OrderEventType::Filled),
            OrderStatus::Cancelled => Some(OrderEventType::Cancelled),
            OrderStatus::Rejected => Some(OrderEventType::Rejected),
        }
    }
}

impl fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only lifecycle record. `event_data` carries the full order
/// snapshot at the moment of the event; together with the trade log this is
/// sufficient to reconstruct any order's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Monotonic id, assigned by the record store on append (0 until then).
    pub event_id: i64,
    pub order_id: Uuid,
    pub event_type: OrderEventType,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl OrderEvent {
    pub fn for_order(order: &Order, event_type: OrderEventType) -> OrderEvent {
        OrderEvent {
            event_id: 0,
            order_id: order.id,
            event_type,
            event_data: serde_json::to_value(order).unwrap_or(serde_json::Value::Null),
            timestamp: order.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderInput, OrderSide, OrderType};
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_snapshot_carries_order_state() {
        let order = OrderInput {
            order_id: None,
            client_id: "alice".to_string(),
            instrument: "BTC-USD".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(70000)),
            quantity: dec!(1),
        }
        .into_order(None, Utc::now());

        let event = OrderEvent::for_order(&order, OrderEventType::Created);
        assert_eq!(event.order_id, order.id);
        assert_eq!(event.event_data["status"], "open");
        assert_eq!(event.event_data["instrument"], "BTC-USD");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(OrderEventType::from_status(OrderStatus::Open), None);
        assert_eq!(
            OrderEventType::from_status(OrderStatus::Filled),
            Some(OrderEventType::Filled)
        );
        assert_eq!(OrderEventType::from_str("partially_filled"), Some(OrderEventType::PartiallyFilled));
        assert_eq!(OrderEventType::from_str("nope"), None);
    }
}
