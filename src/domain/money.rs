use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::error::AppError;

/// Rounds half away from zero to two fraction digits.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Fixed-point "D.DD" rendering used for every amount leaving the API.
pub fn to_fixed(value: Decimal) -> String {
    format!("{:.2}", round2(value))
}

/// Parses a non-negative decimal with at most two fraction digits.
pub fn parse_amount(field: &str, raw: &str) -> Result<Decimal, AppError> {
    let trimmed = raw.trim();
    let value = Decimal::from_str(trimmed)
        .map_err(|_| AppError::validation(field, format!("{} must be a decimal number", field)))?;

    if value.is_sign_negative() && !value.is_zero() {
        return Err(AppError::validation(
            field,
            format!("{} must not be negative", field),
        ));
    }
    if value.scale() > 2 {
        return Err(AppError::validation(
            field,
            format!("{} allows at most 2 decimal places", field),
        ));
    }

    Ok(value)
}

/// `serialize_with` helper for `Decimal` fields rendered as "D.DD".
pub fn serialize_fixed<S: serde::Serializer>(value: &Decimal, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&to_fixed(*value))
}

pub fn parse_optional_amount(field: &str, raw: Option<&str>) -> Result<Option<Decimal>, AppError> {
    raw.map(|r| parse_amount(field, r)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn to_fixed_pads_and_rounds() {
        assert_eq!(to_fixed(dec!(6000)), "6000.00");
        assert_eq!(to_fixed(dec!(0.005)), "0.01");
        assert_eq!(to_fixed(dec!(12.344)), "12.34");
    }

    #[test]
    fn parse_amount_accepts_two_places() {
        assert_eq!(parse_amount("amount", " 150.25 ").unwrap(), dec!(150.25));
        assert_eq!(parse_amount("amount", "8").unwrap(), dec!(8));
    }

    #[test]
    fn parse_amount_rejects_bad_input() {
        for raw in ["abc", "-1.00", "1.234", ""] {
            match parse_amount("hoursWorked", raw) {
                Err(AppError::Validation { field, .. }) => assert_eq!(field, "hoursWorked"),
                other => panic!("expected validation error for {:?}, got {:?}", raw, other),
            }
        }
    }
}
