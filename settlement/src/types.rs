//! Request and response types for the settlement surface

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validation_core::types::{ActorId, DeliveryStatus, Role};

/// One validation attempt as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// Delivery being validated
    pub delivery_id: Uuid,

    /// Code as typed, pre-normalization
    pub code: String,

    /// Submitting actor
    pub actor: ActorId,

    /// Submitting actor's role
    pub role: Role,

    /// Optional proof payload (photo refs, signature blob), stored verbatim
    #[serde(default)]
    pub proof: Option<serde_json::Value>,

    /// Issue reports; a non-empty list settles with reservations
    #[serde(default)]
    pub issues: Vec<serde_json::Value>,
}

/// Result of a successful validation and settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementOutcome {
    /// Settled delivery
    pub delivery_id: Uuid,

    /// Terminal status written
    pub status: DeliveryStatus,

    /// Commission credited to the courier
    pub commission: Decimal,

    /// Code that was consumed
    pub code_id: Uuid,

    /// Commit timestamp
    pub settled_at: DateTime<Utc>,
}

/// A freshly issued validation code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCode {
    /// Code row ID
    pub code_id: Uuid,

    /// Clear 6-digit value, shown once to the client
    pub code: String,

    /// Delivery it is bound to
    pub delivery_id: Uuid,

    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
}

/// Code details for the owning client or an admin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeInfo {
    /// Code row ID
    pub code_id: Uuid,

    /// Clear 6-digit value
    pub code: String,

    /// Delivery it is bound to
    pub delivery_id: Uuid,

    /// Whether it has been consumed or revoked
    pub is_used: bool,

    /// Whether it has passed its expiry
    pub is_expired: bool,

    /// Issue timestamp
    pub created_at: DateTime<Utc>,

    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,

    /// Consumption timestamp, if consumed
    pub used_at: Option<DateTime<Utc>>,
}

/// Result of one maintenance sweep pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired unused codes deleted
    pub codes_deleted: u64,

    /// Attempts purged past the retention window
    pub attempts_purged: u64,
}

/// Reporting period for code statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    /// Trailing 24 hours
    Day,
    /// Trailing 7 days
    Week,
    /// Trailing 30 days
    Month,
}

impl StatsPeriod {
    /// Trailing duration this period covers
    pub fn duration(&self) -> Duration {
        match self {
            StatsPeriod::Day => Duration::hours(24),
            StatsPeriod::Week => Duration::days(7),
            StatsPeriod::Month => Duration::days(30),
        }
    }
}

impl std::fmt::Display for StatsPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsPeriod::Day => write!(f, "day"),
            StatsPeriod::Week => write!(f, "week"),
            StatsPeriod::Month => write!(f, "month"),
        }
    }
}

/// Aggregated code statistics over one period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeStats {
    /// Period covered
    pub period: StatsPeriod,

    /// Codes issued in the period
    pub total_generated: u64,

    /// Codes consumed by settlement
    pub total_used: u64,

    /// Unused codes past expiry
    pub total_expired: u64,

    /// Unused codes still inside their lifetime
    pub total_active: u64,

    /// Used / generated, as a percentage
    pub usage_rate_percent: f64,

    /// Mean minutes from issue to consumption, settlements only
    pub average_validation_minutes: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_durations() {
        assert_eq!(StatsPeriod::Day.duration(), Duration::hours(24));
        assert_eq!(StatsPeriod::Week.duration(), Duration::days(7));
        assert_eq!(StatsPeriod::Month.duration(), Duration::days(30));
    }

    #[test]
    fn test_request_defaults_optional_payloads() {
        let json = serde_json::json!({
            "delivery_id": Uuid::new_v4(),
            "code": "482913",
            "actor": "courier-1",
            "role": "courier",
        });
        let request: ValidationRequest = serde_json::from_value(json).unwrap();
        assert!(request.proof.is_none());
        assert!(request.issues.is_empty());
    }
}
