//! Metrics collection for observability
//!
//! Prometheus metrics for the validation engine:
//!
//! - `validation_codes_generated_total` - Codes successfully generated
//! - `validation_generation_exhausted_total` - Generation give-ups
//! - `validation_attempts_total` - Validation attempts processed
//! - `validation_failures_total` - Attempts that did not settle
//! - `validation_lockouts_total` - Attempts rejected by the lockout window
//! - `validation_settlements_total` - Settlements committed
//! - `validation_commission_paid_total` - Commission paid out (sum)
//! - `validation_codes_swept_total` - Expired codes reclaimed
//!
//! All metrics live on a private registry so multiple engines (tests) can
//! coexist in one process.

use prometheus::{Counter, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Codes successfully generated
    pub codes_generated: IntCounter,

    /// Generation give-ups after the draw budget
    pub generation_exhausted: IntCounter,

    /// Validation attempts processed
    pub attempts: IntCounter,

    /// Attempts that did not settle
    pub failures: IntCounter,

    /// Attempts rejected by the lockout window
    pub lockouts: IntCounter,

    /// Settlements committed
    pub settlements: IntCounter,

    /// Commission paid out (running sum)
    pub commission_paid: Counter,

    /// Expired codes reclaimed by the sweeper
    pub codes_swept: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let codes_generated = IntCounter::new(
            "validation_codes_generated_total",
            "Codes successfully generated",
        )?;
        registry.register(Box::new(codes_generated.clone()))?;

        let generation_exhausted = IntCounter::new(
            "validation_generation_exhausted_total",
            "Generation give-ups after the draw budget",
        )?;
        registry.register(Box::new(generation_exhausted.clone()))?;

        let attempts = IntCounter::new(
            "validation_attempts_total",
            "Validation attempts processed",
        )?;
        registry.register(Box::new(attempts.clone()))?;

        let failures = IntCounter::new(
            "validation_failures_total",
            "Attempts that did not settle",
        )?;
        registry.register(Box::new(failures.clone()))?;

        let lockouts = IntCounter::new(
            "validation_lockouts_total",
            "Attempts rejected by the lockout window",
        )?;
        registry.register(Box::new(lockouts.clone()))?;

        let settlements = IntCounter::new(
            "validation_settlements_total",
            "Settlements committed",
        )?;
        registry.register(Box::new(settlements.clone()))?;

        let commission_paid = Counter::new(
            "validation_commission_paid_total",
            "Commission paid out",
        )?;
        registry.register(Box::new(commission_paid.clone()))?;

        let codes_swept = IntCounter::new(
            "validation_codes_swept_total",
            "Expired codes reclaimed by the sweeper",
        )?;
        registry.register(Box::new(codes_swept.clone()))?;

        Ok(Self {
            codes_generated,
            generation_exhausted,
            attempts,
            failures,
            lockouts,
            settlements,
            commission_paid,
            codes_swept,
            registry,
        })
    }

    /// Record a generated code
    pub fn record_code_generated(&self) {
        self.codes_generated.inc();
    }

    /// Record a generation give-up
    pub fn record_generation_exhausted(&self) {
        self.generation_exhausted.inc();
    }

    /// Record one validation attempt and its outcome
    pub fn record_attempt(&self, success: bool) {
        self.attempts.inc();
        if !success {
            self.failures.inc();
        }
    }

    /// Record a lockout rejection
    pub fn record_lockout(&self) {
        self.lockouts.inc();
    }

    /// Record a committed settlement and the commission paid
    pub fn record_settlement(&self, commission: f64) {
        self.settlements.inc();
        self.commission_paid.inc_by(commission);
    }

    /// Record swept codes
    pub fn record_swept(&self, count: u64) {
        self.codes_swept.inc_by(count);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
