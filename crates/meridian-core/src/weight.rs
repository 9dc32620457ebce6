//! # Weight Pricing Math
//!
//! Pure arithmetic for weight-priced line items: rounding a scale reading to
//! a product's configured precision, and converting (weight × rate/kg) into
//! integer cents.
//!
//! Weights are `rust_decimal::Decimal` kilograms. Money stays integer cents;
//! `Decimal` never leaks into stored monetary values.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ValidationError;
use crate::money::Money;
use crate::MAX_WEIGHT_KG;

/// Rounds a raw weight to the product's configured number of decimal places.
///
/// Uses half-away-from-zero so 0.0255 kg at precision 3 becomes 0.026 kg,
/// matching the rounding rule used for every monetary value.
///
/// ## Example
/// ```rust
/// use rust_decimal::Decimal;
/// use meridian_core::weight::round_weight;
///
/// let raw: Decimal = "1.2345".parse().unwrap();
/// assert_eq!(round_weight(raw, 3).to_string(), "1.235");
/// assert_eq!(round_weight(raw, 2).to_string(), "1.23");
/// ```
pub fn round_weight(weight: Decimal, precision: u32) -> Decimal {
    weight.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

/// Checks that a weight is positive and within the plausible range of a
/// retail scale.
///
/// ## Rules
/// - Must be strictly positive
/// - Must not exceed `MAX_WEIGHT_KG` (a scale reading above it is a
///   hardware fault, not a sale)
pub fn validate_weight(weight: Decimal) -> Result<(), ValidationError> {
    if weight <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: "weight".to_string(),
        });
    }

    if weight > Decimal::from(MAX_WEIGHT_KG) {
        return Err(ValidationError::OutOfRange {
            field: "weight".to_string(),
            min: 0,
            max: MAX_WEIGHT_KG,
        });
    }

    Ok(())
}

/// Prices a weight at a per-kilogram rate, rounding half away from zero to
/// whole cents.
///
/// ## Example
/// ```rust
/// use rust_decimal::Decimal;
/// use meridian_core::money::Money;
/// use meridian_core::weight::price_for_weight;
///
/// // 1.5 kg at $20.00/kg = $30.00
/// let weight: Decimal = "1.5".parse().unwrap();
/// assert_eq!(price_for_weight(Money::from_cents(2000), weight).cents(), 3000);
///
/// // 0.335 kg at $9.99/kg = $3.34665 → $3.35
/// let weight: Decimal = "0.335".parse().unwrap();
/// assert_eq!(price_for_weight(Money::from_cents(999), weight).cents(), 335);
/// ```
pub fn price_for_weight(rate_per_kg: Money, weight: Decimal) -> Money {
    let cents = (Decimal::from(rate_per_kg.cents()) * weight)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    // Weights are bounded by validate_weight, so the product fits an i64;
    // saturate rather than wrap if a caller skipped validation.
    Money::from_cents(cents.to_i64().unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_round_weight_half_away_from_zero() {
        assert_eq!(round_weight(dec("1.2345"), 3), dec("1.235"));
        assert_eq!(round_weight(dec("1.2344"), 3), dec("1.234"));
        assert_eq!(round_weight(dec("0.005"), 2), dec("0.01"));
        assert_eq!(round_weight(dec("2.5"), 0), dec("3"));
    }

    #[test]
    fn test_round_weight_is_idempotent() {
        let once = round_weight(dec("0.12345"), 3);
        let twice = round_weight(once, 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_validate_weight() {
        assert!(validate_weight(dec("0.001")).is_ok());
        assert!(validate_weight(dec("999.999")).is_ok());

        assert!(validate_weight(Decimal::ZERO).is_err());
        assert!(validate_weight(dec("-1.5")).is_err());
        assert!(validate_weight(dec("1000.5")).is_err());
    }

    #[test]
    fn test_price_for_weight() {
        // 1.5 kg × $20.00/kg = $30.00
        assert_eq!(
            price_for_weight(Money::from_cents(2000), dec("1.5")).cents(),
            3000
        );

        // 0.5 kg × $0.01/kg = $0.005 → $0.01 (half away from zero)
        assert_eq!(
            price_for_weight(Money::from_cents(1), dec("0.5")).cents(),
            1
        );

        // 0.333 kg × $2.99/kg = $0.99567 → $1.00
        assert_eq!(
            price_for_weight(Money::from_cents(299), dec("0.333")).cents(),
            100
        );
    }
}
