use crate::error::{Result, SettlementError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// An amount in the smallest currency unit (cents).
pub type Minor = i64;

/// How fractional minor units are resolved to integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    /// Half away from zero.
    #[default]
    Nearest,
    /// Ceiling.
    Up,
    /// Floor.
    Down,
}

impl RoundingMode {
    pub fn apply(self, value: Decimal) -> Result<Minor> {
        let strategy = match self {
            RoundingMode::Nearest => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::Up => RoundingStrategy::ToPositiveInfinity,
            RoundingMode::Down => RoundingStrategy::ToNegativeInfinity,
        };
        value
            .round_dp_with_strategy(0, strategy)
            .to_i64()
            .ok_or_else(|| {
                SettlementError::ValidationError(format!("Amount {} overflows minor units", value))
            })
    }
}

/// Converts a decimal amount already expressed in minor units, refusing fractions.
pub fn minor_from_decimal(value: Decimal) -> Result<Minor> {
    if !value.fract().is_zero() {
        return Err(SettlementError::ValidationError(format!(
            "Amount {} is not a whole number of minor units",
            value
        )));
    }
    value.to_i64().ok_or_else(|| {
        SettlementError::ValidationError(format!("Amount {} overflows minor units", value))
    })
}

/// Rejects zero and negative amounts.
pub fn ensure_positive(amount: Minor, what: &str) -> Result<Minor> {
    if amount > 0 {
        Ok(amount)
    } else {
        Err(SettlementError::ValidationError(format!(
            "{} must be positive, got {}",
            what, amount
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rounding_modes() {
        assert_eq!(RoundingMode::Nearest.apply(dec!(157.5)).unwrap(), 158);
        assert_eq!(RoundingMode::Nearest.apply(dec!(157.49)).unwrap(), 157);
        assert_eq!(RoundingMode::Up.apply(dec!(157.01)).unwrap(), 158);
        assert_eq!(RoundingMode::Down.apply(dec!(157.99)).unwrap(), 157);
        assert_eq!(RoundingMode::Down.apply(dec!(158)).unwrap(), 158);
    }

    #[test]
    fn test_minor_from_decimal_rejects_fractions() {
        assert_eq!(minor_from_decimal(dec!(10500)).unwrap(), 10500);
        assert_eq!(minor_from_decimal(dec!(10500.00)).unwrap(), 10500);
        assert!(matches!(
            minor_from_decimal(dec!(10500.5)),
            Err(SettlementError::ValidationError(_))
        ));
    }

    #[test]
    fn test_ensure_positive() {
        assert_eq!(ensure_positive(1, "amount").unwrap(), 1);
        assert!(ensure_positive(0, "amount").is_err());
        assert!(ensure_positive(-5, "amount").is_err());
    }
}
