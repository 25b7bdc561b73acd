use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::trade::Trade;

/// Net position per (client, instrument), accumulated purely from the trade
/// stream. A buy adds +quantity / +price*quantity, a sell negates both, so
/// the sum of net_quantity across all clients of an instrument is zero.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub client_id: String,
    pub instrument: String,
    pub net_quantity: Decimal,
    pub total_cost: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    pub fn empty(client_id: &str, instrument: &str, at: DateTime<Utc>) -> Position {
        Position {
            client_id: client_id.to_string(),
            instrument: instrument.to_string(),
            net_quantity: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            last_updated: at,
        }
    }

    pub fn apply(&mut self, delta: &PositionDelta, at: DateTime<Utc>) {
        self.net_quantity += delta.net_quantity;
        self.total_cost += delta.total_cost;
        self.last_updated = at;
    }
}

/// Signed delta applied to one client's position by one trade.
#[derive(Debug, Clone, Serialize)]
pub struct PositionDelta {
    pub client_id: String,
    pub instrument: String,
    pub net_quantity: Decimal,
    pub total_cost: Decimal,
}

impl PositionDelta {
    /// The two deltas a trade produces: buyer gains quantity and pays
    /// notional, seller loses quantity and receives notional.
    pub fn from_trade(trade: &Trade, buyer_client: &str, seller_client: &str) -> [PositionDelta; 2] {
        let notional = trade.notional();
        [
            PositionDelta {
                client_id: buyer_client.to_string(),
                instrument: trade.instrument.clone(),
                net_quantity: trade.quantity,
                total_cost: notional,
            },
            PositionDelta {
                client_id: seller_client.to_string(),
                instrument: trade.instrument.clone(),
                net_quantity: -trade.quantity,
                total_cost: -notional,
            },
        ]
    }
}
