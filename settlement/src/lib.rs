//! ParcelRoute Settlement
//!
//! Turns a correct proof-of-delivery code into an irreversible settlement:
//! delivery status transition, courier commission, notifications, and a
//! tamper-evident audit entry, all anchored on one atomic store commit.
//!
//! # Architecture
//!
//! - **Coordinator**: fixed-order precondition checks, then one atomic
//!   commit; racing confirmations resolve to exactly one winner
//! - **Lockout gate**: sliding-window rate limit derived from the attempt
//!   ledger
//! - **Best-effort periphery**: notifications and audit never roll back a
//!   committed settlement
//! - **Sweeper**: periodic reclamation of lapsed codes and stale attempts

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod stats;
pub mod sweeper;
pub mod types;

// Re-exports
pub use config::EngineConfig;
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use sweeper::MaintenanceSweeper;
pub use types::{
    CodeInfo, CodeStats, IssuedCode, SettlementOutcome, StatsPeriod, SweepReport,
    ValidationRequest,
};
