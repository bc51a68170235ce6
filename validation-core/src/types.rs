//! Core types for the validation engine
//!
//! All types are designed for:
//! - Deterministic serialization (bincode; JSON where rows carry opaque payloads)
//! - Exact arithmetic (Decimal for money)
//! - Time-derived expiry (no mutation needed for a code to lapse)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Metadata key marking a code as administratively revoked.
///
/// Revocation forces `is_used = true` like normal consumption, but carries
/// this marker so reporting can tell the two apart.
pub const REVOKED_KEY: &str = "revoked";

/// Metadata key recording which administrator revoked a code.
pub const REVOKED_BY_KEY: &str = "revoked_by";

/// Actor identifier (user id from the identity provider)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Create new actor ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of the acting principal, resolved by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Client who posted the announcement
    Client,
    /// Courier assigned to the delivery
    Courier,
    /// Platform administrator
    Admin,
}

/// Delivery lifecycle status
///
/// This engine reads `InTransit` as its precondition and writes only the two
/// terminal-success states. The remaining states belong to the surrounding
/// delivery subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeliveryStatus {
    /// Announcement matched, not yet accepted
    Pending = 1,
    /// Courier accepted the delivery
    Accepted = 2,
    /// Package picked up, en route
    InTransit = 3,
    /// Hand-off confirmed (terminal)
    Delivered = 4,
    /// Hand-off confirmed with reported issues (terminal)
    DeliveredWithIssues = 5,
    /// Cancelled before completion
    Cancelled = 6,
    /// Under dispute
    Disputed = 7,
}

impl DeliveryStatus {
    /// Check if status is a terminal success state
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::DeliveredWithIssues
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Accepted => "ACCEPTED",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::DeliveredWithIssues => "DELIVERED_WITH_ISSUES",
            DeliveryStatus::Cancelled => "CANCELLED",
            DeliveryStatus::Disputed => "DISPUTED",
        };
        write!(f, "{}", name)
    }
}

/// One-time validation code bound to a delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCode {
    /// Unique code row ID
    pub code_id: Uuid,

    /// The 6-digit code value (the shared secret)
    pub code: String,

    /// Delivery this code proves
    pub delivery_id: Uuid,

    /// Announcement the delivery fulfils
    pub announcement_id: Uuid,

    /// Consumed flag (monotonic: never reverts once set)
    pub is_used: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Expiry timestamp (expiry is time-derived, the row is not mutated)
    pub expires_at: DateTime<Utc>,

    /// When the code was consumed
    pub used_at: Option<DateTime<Utc>>,

    /// Who presented the code
    pub used_by: Option<ActorId>,

    /// Free-form generation/revocation context
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ValidationCode {
    /// Check whether the code has lapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check whether the code can still be consumed at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && !self.is_expired(now)
    }

    /// Check whether the code was administratively revoked
    pub fn is_revoked(&self) -> bool {
        self.metadata.contains_key(REVOKED_KEY)
    }
}

/// One validation attempt, successful or not
///
/// Append-only. Rows are never updated; deletion happens only through the
/// bulk maintenance purge after the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAttempt {
    /// Unique attempt ID (UUIDv7 for time-ordering)
    pub attempt_id: Uuid,

    /// Delivery the attempt targeted
    pub delivery_id: Uuid,

    /// The code value presented
    pub attempted_code: String,

    /// Whether the attempt settled the delivery
    pub success: bool,

    /// When the attempt was made
    pub attempted_at: DateTime<Utc>,

    /// Who made the attempt
    pub attempted_by: ActorId,
}

/// Delivery row (owned by the delivery subsystem)
///
/// This engine mutates only `status`, `validated_at`, `completed_at`,
/// `proof` and `issues`; everything else is read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Unique delivery ID
    pub delivery_id: Uuid,

    /// Announcement being fulfilled
    pub announcement_id: Uuid,

    /// Owning client
    pub client: ActorId,

    /// Assigned courier
    pub courier: ActorId,

    /// Current lifecycle status
    pub status: DeliveryStatus,

    /// Agreed delivery price (exact decimal)
    pub price: Decimal,

    /// When the validation code was accepted
    pub validated_at: Option<DateTime<Utc>>,

    /// When the delivery completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Opaque proof-of-delivery payload, passed through uninterpreted
    pub proof: Option<serde_json::Value>,

    /// Opaque issue reports, passed through uninterpreted
    #[serde(default)]
    pub issues: Vec<serde_json::Value>,
}

/// Commission credit against a courier's wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCredit {
    /// Unique credit ID
    pub credit_id: Uuid,

    /// Courier receiving the commission
    pub beneficiary: ActorId,

    /// Delivery that earned it
    pub delivery_id: Uuid,

    /// Credited amount (already rounded to 2 decimal places)
    pub amount: Decimal,

    /// When the credit was recorded
    pub credited_at: DateTime<Utc>,
}

/// Canonical code normalization, applied once at the engine boundary.
///
/// Codes are pure digits, so trimming surrounding whitespace is the only
/// meaningful normalization; comparison stays exact on the digit string.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_string()
}
