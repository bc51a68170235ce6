//! Settlement engine configuration

use crate::error::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Commission rate applied to the delivery price, as a fraction
    pub commission_rate: Decimal,

    /// Default code lifetime in hours
    pub default_expiration_hours: i64,

    /// Lockout policy
    pub lockout: LockoutConfig,

    /// Maintenance sweeper
    pub sweeper: SweeperConfig,

    /// Audit trail file
    pub audit_log_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commission_rate: Decimal::new(10, 2),
            default_expiration_hours: 24,
            lockout: LockoutConfig::default(),
            sweeper: SweeperConfig::default(),
            audit_log_path: PathBuf::from("./data/validation-audit.log"),
        }
    }
}

/// Sliding-window lockout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Failed attempts tolerated per window
    pub max_failures: u32,

    /// Trailing window in minutes
    pub window_minutes: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            window_minutes: 30,
        }
    }
}

/// Maintenance sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Days an expired code lingers before deletion
    pub grace_days: i64,

    /// Days attempts are retained before the bulk purge
    pub attempt_retention_days: i64,

    /// Seconds between sweep passes
    pub interval_seconds: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            grace_days: 7,
            attempt_retention_days: 30,
            interval_seconds: 86_400,
        }
    }
}

impl EngineConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.commission_rate < Decimal::ZERO || self.commission_rate > Decimal::ONE {
            return Err(Error::Config(format!(
                "commission_rate must be within [0, 1], got {}",
                self.commission_rate
            )));
        }
        if self.default_expiration_hours <= 0 {
            return Err(Error::Config(
                "default_expiration_hours must be positive".to_string(),
            ));
        }
        if self.lockout.max_failures == 0 || self.lockout.window_minutes <= 0 {
            return Err(Error::Config("lockout parameters must be positive".to_string()));
        }
        Ok(())
    }
}
