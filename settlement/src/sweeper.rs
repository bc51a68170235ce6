//! Maintenance sweeper
//!
//! Periodic background reclamation: deletes expired unused codes past their
//! grace period and purges attempts past retention. Each pass is idempotent,
//! so a failed pass is simply retried on the next tick.

use crate::engine::SettlementEngine;
use crate::Result;
use std::sync::Arc;
use validation_core::SettlementStore;

/// Periodic sweep driver
pub struct MaintenanceSweeper<S: SettlementStore> {
    engine: Arc<SettlementEngine<S>>,
    interval_seconds: u64,
}

impl<S: SettlementStore> MaintenanceSweeper<S> {
    /// Create new sweeper
    pub fn new(engine: Arc<SettlementEngine<S>>, interval_seconds: u64) -> Self {
        Self {
            engine,
            interval_seconds,
        }
    }

    /// Run one pass immediately
    pub fn run_once(&self) -> Result<crate::types::SweepReport> {
        self.engine.sweep(chrono::Utc::now())
    }

    /// Run forever on the configured interval. Errors are logged and the
    /// loop continues; only task cancellation stops it.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            interval_seconds = self.interval_seconds,
            "Starting maintenance sweeper"
        );

        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(self.interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.run_once() {
                Ok(report) => {
                    tracing::info!(
                        codes_deleted = report.codes_deleted,
                        attempts_purged = report.attempts_purged,
                        "Sweep pass complete"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Sweep pass failed");
                }
            }
        }
    }
}
