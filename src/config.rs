use crate::domain::fees::FeeConfig;
use crate::domain::policy::PayoutPolicyKind;
use crate::error::{Result, SettlementError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration, loaded once and passed down explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub fees: FeeConfig,
    pub payout: PayoutConfig,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    pub policy: PayoutPolicyKind,
    pub currency: String,
    pub processor_timeout_secs: u64,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            policy: PayoutPolicyKind::FullOnFirstSession,
            currency: "eur".to_string(),
            processor_timeout_secs: 10,
        }
    }
}

impl PayoutConfig {
    pub fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.processor_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    #[default]
    Simulated,
    Stripe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub kind: ProcessorKind,
    pub api_base: String,
    /// Name of the environment variable holding the secret key.
    pub secret_key_env: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            kind: ProcessorKind::Simulated,
            api_base: "https://api.stripe.com".to_string(),
            secret_key_env: "STRIPE_SECRET_KEY".to_string(),
        }
    }
}

impl ProcessorConfig {
    pub fn secret_key(&self) -> Result<String> {
        std::env::var(&self.secret_key_env).map_err(|_| {
            SettlementError::ConfigError(format!(
                "Environment variable {} is not set",
                self.secret_key_env
            ))
        })
    }
}

impl SettlementConfig {
    /// Reads and validates a TOML file. Missing sections fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| SettlementError::ConfigError(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fees.validate()?;
        if self.payout.currency.trim().is_empty() {
            return Err(SettlementError::ConfigError(
                "payout.currency must not be empty".to_string(),
            ));
        }
        if self.payout.processor_timeout_secs == 0 {
            return Err(SettlementError::ConfigError(
                "payout.processor_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::RoundingMode;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SettlementConfig::from_toml("").unwrap();
        assert_eq!(config, SettlementConfig::default());
        assert_eq!(config.fees.processor_fixed_fee_minor, 25);
        assert_eq!(config.payout.policy, PayoutPolicyKind::FullOnFirstSession);
    }

    #[test]
    fn test_partial_override() {
        let config = SettlementConfig::from_toml(
            r#"
            [fees]
            single_service_percent = "0.08"
            rounding_mode = "down"

            [payout]
            policy = "fractional_per_session"
            "#,
        )
        .unwrap();
        assert_eq!(config.fees.single_service_percent, dec!(0.08));
        assert_eq!(config.fees.rounding_mode, RoundingMode::Down);
        assert_eq!(config.fees.bundle_fixed_fee_minor, 300);
        assert_eq!(config.payout.policy, PayoutPolicyKind::FractionalPerSession);
        assert_eq!(config.payout.currency, "eur");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SettlementConfig::from_toml("[payout]\nprocessor_timeout_secs = 0"),
            Err(SettlementError::ConfigError(_))
        ));
        assert!(matches!(
            SettlementConfig::from_toml("[fees]\nvat_rate = \"1.2\""),
            Err(SettlementError::ConfigError(_))
        ));
        assert!(matches!(
            SettlementConfig::from_toml("[payout]\npolicy = \"weekly\""),
            Err(SettlementError::ConfigError(_))
        ));
    }
}
