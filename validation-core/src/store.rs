//! Store traits
//!
//! The engine requires a durable store with atomic multi-row commits; it is
//! consumed through these traits rather than reimplemented. The production
//! implementation is [`crate::storage::Storage`] (RocksDB); tests may
//! substitute fakes for any seam.
//!
//! Ownership: this engine exclusively owns code and attempt rows, has write
//! access to a narrow slice of delivery fields, and append-only access to the
//! wallet ledger.

use crate::error::Result;
use crate::types::{
    ActorId, Delivery, DeliveryStatus, LedgerCredit, ValidationAttempt, ValidationCode,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Persistence and lookup of validation codes
pub trait CodeStore: Send + Sync {
    /// Insert a freshly generated code.
    ///
    /// Fails with [`crate::Error::DuplicateCode`] if another active code
    /// already carries the same value; the final uniqueness check happens
    /// here, under the store's own lock, so concurrent generators cannot
    /// both persist one value.
    fn insert_code(&self, code: &ValidationCode) -> Result<()>;

    /// Get a code row by ID
    fn get_code(&self, code_id: Uuid) -> Result<ValidationCode>;

    /// Find the active (unused, unexpired at `now`) code with this value
    fn find_active(&self, code: &str, now: DateTime<Utc>) -> Result<Option<ValidationCode>>;

    /// Find the most recent code with this value, active or not
    fn find_by_code(&self, code: &str) -> Result<Option<ValidationCode>>;

    /// Find the code bound to a delivery
    fn find_by_delivery(&self, delivery_id: Uuid) -> Result<Option<ValidationCode>>;

    /// Administratively revoke a code: forces `is_used = true` with a
    /// revocation marker, distinct from normal consumption. Returns `false`
    /// if the code was already used or revoked. Never settles anything.
    fn revoke_code(
        &self,
        code_id: Uuid,
        actor: &ActorId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete unused codes that expired at least `grace` ago.
    /// Returns the number of rows deleted. Idempotent.
    fn sweep_expired(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64>;

    /// All codes created at or after `since` (stats aggregation)
    fn codes_created_since(&self, since: DateTime<Utc>) -> Result<Vec<ValidationCode>>;
}

/// Append-only record of validation attempts
pub trait AttemptLedger: Send + Sync {
    /// Append one attempt. Safe under concurrent writers; rows are never
    /// updated in place.
    fn record_attempt(&self, attempt: &ValidationAttempt) -> Result<()>;

    /// All attempts for a delivery, oldest first
    fn attempts_for_delivery(&self, delivery_id: Uuid) -> Result<Vec<ValidationAttempt>>;

    /// Bulk purge of attempts older than `cutoff`. Returns rows deleted.
    fn purge_attempts_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Narrow view of the delivery subsystem's rows
pub trait DeliveryStore: Send + Sync {
    /// Upsert a delivery row (seeding by the surrounding system)
    fn put_delivery(&self, delivery: &Delivery) -> Result<()>;

    /// Get a delivery row
    fn get_delivery(&self, delivery_id: Uuid) -> Result<Delivery>;
}

/// Append-only wallet ledger for commission credits
pub trait WalletLedger: Send + Sync {
    /// All credits recorded for a beneficiary
    fn credits_for(&self, beneficiary: &ActorId) -> Result<Vec<LedgerCredit>>;

    /// Running total-earnings counter for a beneficiary
    fn total_earnings(&self, beneficiary: &ActorId) -> Result<Decimal>;
}

/// Row bundle for one settlement commit
#[derive(Debug, Clone)]
pub struct SettlementCommit {
    /// Code being consumed
    pub code_id: Uuid,

    /// Delivery being settled
    pub delivery_id: Uuid,

    /// Actor who presented the code
    pub actor: ActorId,

    /// Terminal status to write
    pub final_status: DeliveryStatus,

    /// Opaque proof payload, attached verbatim
    pub proof: Option<serde_json::Value>,

    /// Opaque issue reports, attached verbatim
    pub issues: Vec<serde_json::Value>,

    /// Commission credit for the courier
    pub credit: LedgerCredit,

    /// Success attempt row, persisted in the same batch as the settlement
    /// so a settled delivery always carries its success record
    pub attempt: ValidationAttempt,

    /// Commit timestamp
    pub settled_at: DateTime<Utc>,
}

/// Combined store surface the settlement coordinator operates on
pub trait SettlementStore:
    CodeStore + AttemptLedger + DeliveryStore + WalletLedger
{
    /// Apply one settlement atomically: all rows change or none do.
    ///
    /// The `is_used` transition is conditional at commit time. If the code
    /// was consumed by a racing request the commit fails with
    /// [`crate::Error::CodeConsumed`]; if the delivery left `InTransit` it
    /// fails with [`crate::Error::StatusConflict`]. In either case nothing
    /// was persisted.
    fn commit_settlement(&self, commit: &SettlementCommit) -> Result<()>;
}
