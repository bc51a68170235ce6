//! Code statistics aggregation
//!
//! Pure fold over code rows; the engine fetches the rows for the period and
//! hands them here. Revoked codes count as used (they are consumed rows) but
//! are excluded from the validation-latency mean, which measures real
//! hand-offs only.

use crate::types::{CodeStats, StatsPeriod};
use chrono::{DateTime, Utc};
use validation_core::types::ValidationCode;

/// Aggregate statistics over the codes created in one period
pub fn aggregate(period: StatsPeriod, codes: &[ValidationCode], now: DateTime<Utc>) -> CodeStats {
    let total_generated = codes.len() as u64;

    let mut total_used: u64 = 0;
    let mut total_expired: u64 = 0;
    let mut total_active: u64 = 0;
    let mut latency_minutes_sum: f64 = 0.0;
    let mut latency_samples: u64 = 0;

    for code in codes {
        if code.is_used {
            total_used += 1;
            if !code.is_revoked() {
                if let Some(used_at) = code.used_at {
                    let minutes =
                        (used_at - code.created_at).num_seconds() as f64 / 60.0;
                    latency_minutes_sum += minutes;
                    latency_samples += 1;
                }
            }
        } else if code.is_expired(now) {
            total_expired += 1;
        } else {
            total_active += 1;
        }
    }

    let usage_rate_percent = if total_generated > 0 {
        (total_used as f64 / total_generated as f64) * 100.0
    } else {
        0.0
    };

    let average_validation_minutes = if latency_samples > 0 {
        Some(latency_minutes_sum / latency_samples as f64)
    } else {
        None
    };

    CodeStats {
        period,
        total_generated,
        total_used,
        total_expired,
        total_active,
        usage_rate_percent,
        average_validation_minutes,
    }
}
