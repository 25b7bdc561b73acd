//! Single-venue exchange core: per-instrument matching engines under an
//! exchange coordinator, with durable persistence, idempotent submission,
//! event publication, snapshots and cold-start recovery.

pub mod cache;
pub mod config;
pub mod db;
pub mod eventlog;
pub mod metrics;
pub mod models;
pub mod retry;
pub mod services;
