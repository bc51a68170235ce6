//! ParcelRoute Validation Core
//!
//! Proof-of-delivery validation primitives and their durable store.
//!
//! # Architecture
//!
//! - **Code lifecycle**: 6-digit codes generated, bound to one delivery,
//!   consumed exactly once
//! - **Attempt ledger**: Append-only record of every validation attempt
//! - **Sliding-window lockout**: Derived from the attempt ledger, no stored
//!   unlock state
//! - **Atomic settlement**: Code, delivery, and wallet rows commit in one
//!   RocksDB write batch
//!
//! # Invariants
//!
//! - Single consumption: a code settles at most one delivery, ever
//! - Conservation: every commission credit traces to exactly one settlement
//! - Attempts are never updated or deleted except by retention purge

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod clock;
pub mod codegen;
pub mod config;
pub mod error;
pub mod lockout;
pub mod metrics;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use clock::{Clock, SystemClock};
pub use codegen::CodeGenerator;
pub use config::Config;
pub use error::{Error, Result};
pub use lockout::{LockoutDecision, LockoutPolicy};
pub use metrics::Metrics;
pub use storage::Storage;
pub use store::{
    AttemptLedger, CodeStore, DeliveryStore, SettlementCommit, SettlementStore, WalletLedger,
};
pub use types::{
    ActorId, Delivery, DeliveryStatus, LedgerCredit, Role, ValidationAttempt, ValidationCode,
};
