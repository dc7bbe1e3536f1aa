//! Fee and commission calculator.
//!
//! Splits a customer charge into the provider's net amount, the platform's
//! service fee, an estimate of the processor's fee and the remaining margin.
//! Everything here is pure: the configuration is passed in at construction.

use super::money::{Minor, RoundingMode, ensure_positive};
use crate::error::{Result, SettlementError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Fee parameters. Rates are decimal fractions (`0.015` is 1.5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub processor_percent_fee: Decimal,
    pub processor_fixed_fee_minor: Minor,
    pub single_service_percent: Decimal,
    pub bundle_fixed_fee_minor: Minor,
    pub bundle_percent: Decimal,
    pub rounding_mode: RoundingMode,
    pub vat_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            processor_percent_fee: dec!(0.015),
            processor_fixed_fee_minor: 25,
            single_service_percent: dec!(0.05),
            bundle_fixed_fee_minor: 300,
            bundle_percent: dec!(0.02),
            rounding_mode: RoundingMode::Nearest,
            vat_rate: dec!(0.20),
        }
    }
}

impl FeeConfig {
    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("processor_percent_fee", self.processor_percent_fee),
            ("single_service_percent", self.single_service_percent),
            ("bundle_percent", self.bundle_percent),
            ("vat_rate", self.vat_rate),
        ];
        for (name, rate) in rates {
            if rate < Decimal::ZERO || rate >= Decimal::ONE {
                return Err(SettlementError::ConfigError(format!(
                    "{} must be a fraction in [0, 1), got {}",
                    name, rate
                )));
            }
        }
        if self.processor_fixed_fee_minor < 0 || self.bundle_fixed_fee_minor < 0 {
            return Err(SettlementError::ConfigError(
                "Fixed fees must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub provider_net_minor: Minor,
    pub service_fee_minor: Minor,
    pub total_charged_minor: Minor,
    pub processing_fee_estimate_minor: Minor,
    pub platform_margin_minor: Minor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleBreakdown {
    #[serde(flatten)]
    pub fees: FeeBreakdown,
    pub sessions_count: u32,
    pub per_session_payout_minor: Minor,
    /// Attributed to the final session so the per-session payouts sum to the provider net.
    pub payout_remainder_minor: Minor,
}

/// Reporting-only split of the platform margin; always sums back to the margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatSplit {
    pub margin_ex_vat_minor: Minor,
    pub margin_vat_minor: Minor,
}

#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    config: FeeConfig,
}

impl FeeCalculator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    pub fn compute_for_single(&self, base_price_minor: Minor) -> Result<FeeBreakdown> {
        ensure_positive(base_price_minor, "Base price")?;
        let service_fee = self
            .config
            .rounding_mode
            .apply(Decimal::from(base_price_minor) * self.config.single_service_percent)?;
        self.breakdown(base_price_minor, service_fee)
    }

    pub fn compute_for_bundle(
        &self,
        base_price_minor: Minor,
        sessions_count: u32,
    ) -> Result<BundleBreakdown> {
        ensure_positive(base_price_minor, "Base price")?;
        if sessions_count == 0 {
            return Err(SettlementError::ValidationError(
                "Sessions count must be positive".to_string(),
            ));
        }
        let percent_part = self
            .config
            .rounding_mode
            .apply(Decimal::from(base_price_minor) * self.config.bundle_percent)?;
        let fees = self.breakdown(
            base_price_minor,
            self.config.bundle_fixed_fee_minor + percent_part,
        )?;

        let sessions = Minor::from(sessions_count);
        let per_session = fees.provider_net_minor / sessions;
        Ok(BundleBreakdown {
            fees,
            sessions_count,
            per_session_payout_minor: per_session,
            payout_remainder_minor: fees.provider_net_minor - per_session * sessions,
        })
    }

    pub fn vat_split(&self, platform_margin_minor: Minor) -> Result<VatSplit> {
        if platform_margin_minor < 0 {
            return Err(SettlementError::ValidationError(
                "Platform margin must not be negative".to_string(),
            ));
        }
        let ex_vat = self
            .config
            .rounding_mode
            .apply(Decimal::from(platform_margin_minor) / (Decimal::ONE + self.config.vat_rate))?;
        Ok(VatSplit {
            margin_ex_vat_minor: ex_vat,
            margin_vat_minor: platform_margin_minor - ex_vat,
        })
    }

    fn breakdown(&self, provider_net: Minor, service_fee: Minor) -> Result<FeeBreakdown> {
        let total_charged = provider_net.checked_add(service_fee).ok_or_else(|| {
            SettlementError::ValidationError("Total charge overflows minor units".to_string())
        })?;
        // The processor assesses its fee on the full amount it moves, not on our share.
        let processing_fee = self.config.rounding_mode.apply(
            Decimal::from(total_charged) * self.config.processor_percent_fee
                + Decimal::from(self.config.processor_fixed_fee_minor),
        )?;
        Ok(FeeBreakdown {
            provider_net_minor: provider_net,
            service_fee_minor: service_fee,
            total_charged_minor: total_charged,
            processing_fee_estimate_minor: processing_fee,
            // Processing-fee variance is absorbed by the platform, never shown as a loss.
            platform_margin_minor: (service_fee - processing_fee).max(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_single_booking_breakdown() {
        let calc = FeeCalculator::default();
        let fees = calc.compute_for_single(10_000).unwrap();
        assert_eq!(fees.provider_net_minor, 10_000);
        assert_eq!(fees.service_fee_minor, 500);
        assert_eq!(fees.total_charged_minor, 10_500);
        assert_eq!(fees.processing_fee_estimate_minor, 183);
        assert_eq!(fees.platform_margin_minor, 317);
    }

    #[test]
    fn test_bundle_breakdown() {
        let calc = FeeCalculator::default();
        let bundle = calc.compute_for_bundle(85_000, 10).unwrap();
        assert_eq!(bundle.fees.service_fee_minor, 2_000);
        assert_eq!(bundle.fees.total_charged_minor, 87_000);
        assert_eq!(bundle.per_session_payout_minor, 8_500);
        assert_eq!(bundle.payout_remainder_minor, 0);
    }

    #[test]
    fn test_bundle_remainder_goes_to_final_session() {
        let calc = FeeCalculator::default();
        let bundle = calc.compute_for_bundle(10_001, 3).unwrap();
        assert_eq!(bundle.per_session_payout_minor, 3_333);
        assert_eq!(bundle.payout_remainder_minor, 2);
    }

    #[test]
    fn test_margin_is_clamped_at_zero() {
        let calc = FeeCalculator::default();
        let fees = calc.compute_for_single(100).unwrap();
        assert_eq!(fees.service_fee_minor, 5);
        assert_eq!(fees.processing_fee_estimate_minor, 27);
        assert_eq!(fees.platform_margin_minor, 0);
    }

    #[test]
    fn test_rounding_mode_changes_estimate() {
        let up = FeeCalculator::new(FeeConfig {
            rounding_mode: RoundingMode::Up,
            ..FeeConfig::default()
        });
        let down = FeeCalculator::new(FeeConfig {
            rounding_mode: RoundingMode::Down,
            ..FeeConfig::default()
        });
        // 10_500 * 0.015 = 157.5
        assert_eq!(up.compute_for_single(10_000).unwrap().processing_fee_estimate_minor, 183);
        assert_eq!(down.compute_for_single(10_000).unwrap().processing_fee_estimate_minor, 182);
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        let calc = FeeCalculator::default();
        assert!(matches!(
            calc.compute_for_single(0),
            Err(SettlementError::ValidationError(_))
        ));
        assert!(matches!(
            calc.compute_for_single(-10),
            Err(SettlementError::ValidationError(_))
        ));
        assert!(matches!(
            calc.compute_for_bundle(85_000, 0),
            Err(SettlementError::ValidationError(_))
        ));
    }

    #[test]
    fn test_vat_split_reconciles() {
        let calc = FeeCalculator::default();
        let split = calc.vat_split(317).unwrap();
        assert_eq!(split.margin_ex_vat_minor, 264);
        assert_eq!(split.margin_vat_minor, 53);
        assert_eq!(split.margin_ex_vat_minor + split.margin_vat_minor, 317);
    }

    #[test]
    fn test_config_validation() {
        assert!(FeeConfig::default().validate().is_ok());
        let bad = FeeConfig {
            single_service_percent: dec!(1.5),
            ..FeeConfig::default()
        };
        assert!(matches!(bad.validate(), Err(SettlementError::ConfigError(_))));
    }

    #[test]
    fn test_randomized_breakdown_invariants() {
        let mut rng = rand::thread_rng();
        for mode in [RoundingMode::Nearest, RoundingMode::Up, RoundingMode::Down] {
            let calc = FeeCalculator::new(FeeConfig {
                rounding_mode: mode,
                ..FeeConfig::default()
            });
            for _ in 0..500 {
                let price: Minor = rng.gen_range(1..50_000_000);
                let fees = calc.compute_for_single(price).unwrap();
                assert_eq!(fees.total_charged_minor, price + fees.service_fee_minor);
                if fees.service_fee_minor >= fees.processing_fee_estimate_minor {
                    assert_eq!(
                        fees.processing_fee_estimate_minor + fees.platform_margin_minor,
                        fees.service_fee_minor
                    );
                } else {
                    assert_eq!(fees.platform_margin_minor, 0);
                }

                let split = calc.vat_split(fees.platform_margin_minor).unwrap();
                assert_eq!(
                    split.margin_ex_vat_minor + split.margin_vat_minor,
                    fees.platform_margin_minor
                );

                let sessions: u32 = rng.gen_range(1..40);
                let bundle = calc.compute_for_bundle(price, sessions).unwrap();
                assert_eq!(
                    bundle.per_session_payout_minor * Minor::from(sessions)
                        + bundle.payout_remainder_minor,
                    bundle.fees.provider_net_minor
                );
            }
        }
    }
}
