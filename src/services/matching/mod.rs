//! Order Matching Module
//!
//! Price-time priority matching with a transactional envelope.
//!
//! # Architecture
//!
//! ```text
//! Caller
//!   ↓
//! ExchangeCoordinator            validation, idempotency, routing, reads
//!   ├→ InstrumentEngine (task)   one serialized command queue per instrument
//!   │    └→ OrderBook            ladders + id index, owned by the task
//!   ├→ EventPublisher            order_events + event log + fan-out + broadcast
//!   ├→ TradeHistory              in-memory recent trades
//!   └→ RecordStore               durable orders/trades/positions
//! ```
//!
//! Per instrument, command acceptance order equals match order equals
//! persistence order equals publication order: the engine task finishes a
//! command's persistence and publication before taking the next one.
//! Recovery rebuilds the books from the record store alone; the snapshot
//! scheduler captures depth through the same serialized queue.

pub mod coordinator;
pub mod engine;
pub mod history;
pub mod orderbook;
pub mod publisher;
pub mod recovery;
pub mod snapshots;
pub mod types;

pub use coordinator::{CoordinatorConfig, ExchangeCoordinator};
pub use engine::{EngineCommand, EngineHandle, InstrumentEngine};
pub use history::TradeHistory;
pub use orderbook::OrderBook;
pub use publisher::EventPublisher;
pub use recovery::{recover, RecoveryReport};
pub use snapshots::{SnapshotConfig, SnapshotScheduler};
pub use types::*;
