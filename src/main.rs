use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exchange_core::cache::{CacheConfig, CacheManager};
use exchange_core::config::AppConfig;
use exchange_core::db::PgRecordStore;
use exchange_core::eventlog::{EventLog, NullEventLog, RedisEventLog};
use exchange_core::services::matching::{recover, ExchangeCoordinator, SnapshotScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exchange_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting exchange core v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    // Durable record store
    let store = Arc::new(PgRecordStore::connect(&config.database_url, config.retry_policy()).await?);
    tracing::info!("Record store connected");

    // Fast KV store (idempotency cache + fan-out)
    let cache = Arc::new(
        CacheManager::new(CacheConfig {
            redis_url: config.redis_url.clone(),
            retry: config.retry_policy(),
        })
        .await,
    );
    if cache.is_available() {
        tracing::info!("Cache manager initialized with Redis at {}", cache.config().redis_url);
    } else {
        tracing::warn!("Cache manager running without Redis (graceful degradation)");
    }

    // Event log rides the same Redis; without it, producers drop payloads
    let event_log: Arc<dyn EventLog> = match cache.redis() {
        Some(redis) => Arc::new(RedisEventLog::new(redis.clone())),
        None => {
            tracing::warn!("Event log disabled - Redis is unavailable");
            Arc::new(NullEventLog)
        }
    };

    // Coordinator and recovery
    let coordinator = Arc::new(ExchangeCoordinator::new(
        store,
        cache,
        event_log,
        config.coordinator_config(),
    ));

    let report = recover(&coordinator).await?;
    if report.orders_restored > 0 {
        tracing::info!(
            "Recovered {} open orders across {} instruments",
            report.orders_restored,
            report.instruments
        );
    } else {
        tracing::info!("No open orders to recover");
    }

    // Periodic book snapshots
    let scheduler = SnapshotScheduler::start(coordinator.clone(), config.snapshot_config());

    tracing::info!(
        "Exchange core ready (instruments configured: {:?})",
        config.get_instruments()
    );

    // Front-end wiring is out of scope here; park until shutdown.
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    scheduler.shutdown();

    Ok(())
}
