//! Engine configuration
//!
//! Loaded from `CARD_ENGINE_*` environment variables with `envy`, after an
//! optional `.env` file. Every setting has a default, so an empty environment
//! yields a working sandbox configuration.
//!
//! # Environment Variables
//!
//! - `CARD_ENGINE_WEBHOOK_TIMEOUT_SECS` (default 600)
//! - `CARD_ENGINE_DECLINE_VERIFICATION_DELAY_SECS` (default 30)
//! - `CARD_ENGINE_BALANCE_TOLERANCE` (default 0.01)
//! - `CARD_ENGINE_DECLINE_FEE_TOLERANCE` (default 0.05)
//! - `CARD_ENGINE_PROVIDER_DECLINE_FEE` (default 0.30)
//! - `CARD_ENGINE_BALANCE_CACHE_TTL_SECS` (default 180)
//! - `CARD_ENGINE_SYNC_INTERVAL_SECS` (default 300)
//! - `CARD_ENGINE_CORRELATOR_FAILURE_THRESHOLD` (default 5)
//! - `CARD_ENGINE_CORRELATOR_COOLDOWN_SECS` (default 60)
//! - `CARD_ENGINE_MAPLERAD_BASE_URL` (default sandbox API)
//! - `CARD_ENGINE_MAPLERAD_SECRET_KEY` (optional; the sandbox provider is used without it)
//! - `CARD_ENGINE_FEE_SCHEDULE_PATH` (optional fee schedule CSV)

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::balance_sync::BalanceSyncConfig;
use crate::core::correlator::CorrelatorConfig;
use crate::core::issuance::IssuanceConfig;
use crate::core::reconciliation::ReconciliationConfig;
use crate::provider::maplerad::DEFAULT_BASE_URL;
use crate::types::EngineError;

pub const ENV_PREFIX: &str = "CARD_ENGINE_";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    #[serde(default = "default_decline_verification_delay_secs")]
    pub decline_verification_delay_secs: u64,

    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: Decimal,

    #[serde(default = "default_decline_fee_tolerance")]
    pub decline_fee_tolerance: Decimal,

    #[serde(default = "default_provider_decline_fee")]
    pub provider_decline_fee: Decimal,

    #[serde(default = "default_balance_cache_ttl_secs")]
    pub balance_cache_ttl_secs: u64,

    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    #[serde(default = "default_correlator_failure_threshold")]
    pub correlator_failure_threshold: u32,

    #[serde(default = "default_correlator_cooldown_secs")]
    pub correlator_cooldown_secs: u64,

    #[serde(default = "default_maplerad_base_url")]
    pub maplerad_base_url: String,

    #[serde(default)]
    pub maplerad_secret_key: Option<String>,

    #[serde(default)]
    pub fee_schedule_path: Option<PathBuf>,
}

fn default_webhook_timeout_secs() -> u64 {
    600
}

fn default_decline_verification_delay_secs() -> u64 {
    30
}

fn default_balance_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn default_decline_fee_tolerance() -> Decimal {
    Decimal::new(5, 2)
}

fn default_provider_decline_fee() -> Decimal {
    Decimal::new(30, 2)
}

fn default_balance_cache_ttl_secs() -> u64 {
    180
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_correlator_failure_threshold() -> u32 {
    5
}

fn default_correlator_cooldown_secs() -> u64 {
    60
}

fn default_maplerad_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            webhook_timeout_secs: default_webhook_timeout_secs(),
            decline_verification_delay_secs: default_decline_verification_delay_secs(),
            balance_tolerance: default_balance_tolerance(),
            decline_fee_tolerance: default_decline_fee_tolerance(),
            provider_decline_fee: default_provider_decline_fee(),
            balance_cache_ttl_secs: default_balance_cache_ttl_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            correlator_failure_threshold: default_correlator_failure_threshold(),
            correlator_cooldown_secs: default_correlator_cooldown_secs(),
            maplerad_base_url: default_maplerad_base_url(),
            maplerad_secret_key: None,
            fee_schedule_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment
    ///
    /// A `.env` file is read first if present.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` when a variable cannot be parsed.
    pub fn from_env() -> Result<Self, EngineError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from explicit `(name, value)` pairs
    pub fn from_vars<I>(vars: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX)
            .from_iter::<_, EngineConfig>(vars)
            .map_err(|e| EngineError::Config { message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let negative = [
            ("balance_tolerance", self.balance_tolerance),
            ("decline_fee_tolerance", self.decline_fee_tolerance),
            ("provider_decline_fee", self.provider_decline_fee),
        ]
        .into_iter()
        .find(|(_, value)| *value < Decimal::ZERO);

        if let Some((name, value)) = negative {
            return Err(EngineError::Config {
                message: format!("{} cannot be negative, got {}", name, value),
            });
        }
        if self.webhook_timeout_secs == 0 {
            return Err(EngineError::Config {
                message: "webhook_timeout_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn issuance(&self) -> IssuanceConfig {
        IssuanceConfig {
            webhook_timeout: Duration::from_secs(self.webhook_timeout_secs),
        }
    }

    pub fn correlator(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            failure_threshold: self.correlator_failure_threshold,
            cooldown: Duration::from_secs(self.correlator_cooldown_secs),
        }
    }

    pub fn reconciliation(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            decline_verification_delay: Duration::from_secs(self.decline_verification_delay_secs),
            provider_decline_fee: self.provider_decline_fee,
            decline_fee_tolerance: self.decline_fee_tolerance,
        }
    }

    pub fn balance_sync(&self) -> BalanceSyncConfig {
        BalanceSyncConfig {
            tolerance: self.balance_tolerance,
            cache_ttl: Duration::from_secs(self.balance_cache_ttl_secs),
            interval: Duration::from_secs(self.sync_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = EngineConfig::from_vars(Vec::new()).unwrap();

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.issuance().webhook_timeout, Duration::from_secs(600));
        assert_eq!(config.reconciliation(), ReconciliationConfig::default());
        assert_eq!(config.balance_sync(), BalanceSyncConfig::default());
        assert_eq!(config.correlator(), CorrelatorConfig::default());
    }

    #[test]
    fn test_prefixed_variables_override_defaults() {
        let config = EngineConfig::from_vars(vars(&[
            ("CARD_ENGINE_WEBHOOK_TIMEOUT_SECS", "120"),
            ("CARD_ENGINE_PROVIDER_DECLINE_FEE", "0.25"),
            ("CARD_ENGINE_MAPLERAD_SECRET_KEY", "sk_live"),
            ("CARD_ENGINE_FEE_SCHEDULE_PATH", "fees.csv"),
            ("WEBHOOK_TIMEOUT_SECS", "1"),
        ]))
        .unwrap();

        assert_eq!(config.webhook_timeout_secs, 120);
        assert_eq!(config.provider_decline_fee, Decimal::new(25, 2));
        assert_eq!(config.maplerad_secret_key.as_deref(), Some("sk_live"));
        assert_eq!(config.fee_schedule_path, Some(PathBuf::from("fees.csv")));
    }

    #[rstest]
    #[case::not_a_number("CARD_ENGINE_SYNC_INTERVAL_SECS", "soon")]
    #[case::negative_tolerance("CARD_ENGINE_BALANCE_TOLERANCE", "-0.01")]
    #[case::zero_timeout("CARD_ENGINE_WEBHOOK_TIMEOUT_SECS", "0")]
    fn test_invalid_values_are_config_errors(#[case] name: &str, #[case] value: &str) {
        let error = EngineConfig::from_vars(vars(&[(name, value)])).unwrap_err();
        assert!(matches!(error, EngineError::Config { .. }));
    }
}
