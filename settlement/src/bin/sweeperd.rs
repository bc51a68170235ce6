//! Standalone maintenance sweeper daemon
//!
//! Opens the validation store and runs the periodic sweep loop until killed.

use settlement::audit::JsonlAuditLog;
use settlement::config::EngineConfig;
use settlement::engine::SettlementEngine;
use settlement::notify::TracingNotifier;
use settlement::sweeper::MaintenanceSweeper;
use std::sync::Arc;
use tracing::info;
use validation_core::{Config, Storage, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Maintenance sweeper starting...");

    // Load configuration
    let store_config = Config::from_env()?;
    let engine_config = match std::env::var("SETTLEMENT_CONFIG") {
        Ok(path) => EngineConfig::from_file(path)?,
        Err(_) => EngineConfig::default(),
    };

    info!(
        data_dir = %store_config.data_dir.display(),
        interval_seconds = engine_config.sweeper.interval_seconds,
        grace_days = engine_config.sweeper.grace_days,
        "Configuration loaded"
    );

    let storage = Arc::new(Storage::open(&store_config)?);
    let audit = Arc::new(JsonlAuditLog::open(engine_config.audit_log_path.clone())?);

    let interval_seconds = engine_config.sweeper.interval_seconds;
    let engine = Arc::new(SettlementEngine::new(
        storage,
        engine_config,
        Arc::new(TracingNotifier),
        audit,
        Arc::new(SystemClock),
    )?);

    info!("Maintenance sweeper initialized successfully");

    let sweeper = Arc::new(MaintenanceSweeper::new(engine, interval_seconds));
    sweeper.run().await;

    Ok(())
}
