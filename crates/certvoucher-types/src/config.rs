//! Configuration types for the CertVoucher engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{VoucherError, constants};

/// Engine-wide configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub allocation: AllocationConfig,
    pub reconciliation: ReconciliationConfig,
    pub recycling: RecyclingConfig,
}

impl EngineConfig {
    /// Reject values that would make the engine spin or never act.
    ///
    /// # Errors
    /// Returns `Configuration` naming the offending field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.allocation.max_attempts == 0 {
            return Err(VoucherError::Configuration(
                "allocation.max_attempts must be > 0".into(),
            ));
        }
        if self.reconciliation.query_timeout_secs == 0 {
            return Err(VoucherError::Configuration(
                "reconciliation.query_timeout_secs must be > 0".into(),
            ));
        }
        if self.recycling.grace_period_secs == 0 {
            return Err(VoucherError::Configuration(
                "recycling.grace_period_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Allocation tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Candidates tried before reporting contention.
    pub max_attempts: u32,
    /// Refuse requests that have no external authority case yet.
    pub require_external_ticket: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_ALLOCATION_ATTEMPTS,
            require_external_ticket: true,
        }
    }
}

/// Reconciliation sweep tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Seconds between sweeps. 0 disables the periodic loop.
    pub interval_secs: u64,
    /// Pause between two external authority calls.
    pub call_delay_ms: u64,
    /// Upper bound on one external authority call.
    pub query_timeout_secs: u64,
}

impl ReconciliationConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }

    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: constants::DEFAULT_RECONCILE_INTERVAL_SECS,
            call_delay_ms: constants::DEFAULT_ISSUER_CALL_DELAY_MS,
            query_timeout_secs: constants::DEFAULT_ISSUER_TIMEOUT_SECS,
        }
    }
}

/// Recycling sweep tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecyclingConfig {
    /// Age after which an unused allocation is reclaimed.
    pub grace_period_secs: u64,
    /// Seconds between sweeps. 0 disables the periodic loop.
    pub interval_secs: u64,
}

impl RecyclingConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Grace period as a calendar duration.
    #[must_use]
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.grace_period_secs).unwrap_or(i64::MAX))
    }
}

impl Default for RecyclingConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: constants::DEFAULT_GRACE_PERIOD_SECS,
            interval_secs: constants::DEFAULT_RECYCLE_INTERVAL_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behaviour() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.allocation.max_attempts, 5);
        assert!(cfg.allocation.require_external_ticket);
        assert_eq!(cfg.reconciliation.call_delay(), Duration::from_millis(500));
        assert_eq!(cfg.recycling.grace_period(), chrono::Duration::days(3));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"recycling":{"grace_period_secs":60}}"#).unwrap();
        assert_eq!(cfg.recycling.grace_period_secs, 60);
        assert_eq!(cfg.recycling.interval_secs, constants::DEFAULT_RECYCLE_INTERVAL_SECS);
        assert_eq!(cfg.allocation, AllocationConfig::default());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.allocation.max_attempts = 0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, VoucherError::Configuration(_)));
    }
}
