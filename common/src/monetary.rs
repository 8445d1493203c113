//! Monetary rules for Ledgerline amounts and balances.
//!
//! Balances are fixed-point decimals stored as `NUMERIC(15,2)`, so every
//! amount entering the ledger is checked against that shape before it is
//! accepted.

use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};

/// Number of fractional digits kept for every amount.
pub const AMOUNT_SCALE: u32 = 2;

/// Largest amount representable by a `NUMERIC(15,2)` column.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_764_472_319, 232_830, 0, false, AMOUNT_SCALE);

/// Validate a movement amount: strictly positive, at most two decimal
/// places and within column range.
pub fn validate_amount(value: Decimal, field: &str) -> Result<Decimal> {
    if value <= Decimal::ZERO {
        return Err(LedgerError::invalid_field(
            "amount must be greater than zero",
            field,
        ));
    }
    check_shape(value, field)
}

/// Validate an opening balance. Zero is allowed.
pub fn validate_initial_balance(value: Decimal) -> Result<Decimal> {
    if value < Decimal::ZERO {
        return Err(LedgerError::invalid_field(
            "initial balance cannot be negative",
            "initial_balance",
        ));
    }
    check_shape(value, "initial_balance")
}

fn check_shape(value: Decimal, field: &str) -> Result<Decimal> {
    if value.normalize().scale() > AMOUNT_SCALE {
        return Err(LedgerError::invalid_field(
            format!("{field} supports at most {AMOUNT_SCALE} decimal places"),
            field,
        ));
    }
    if value > MAX_AMOUNT {
        return Err(LedgerError::invalid_field(
            format!("{field} exceeds the maximum of {MAX_AMOUNT}"),
            field,
        ));
    }
    Ok(value.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_max_amount_value() {
        assert_eq!(MAX_AMOUNT, dec!(9999999999999.99));
    }

    #[test]
    fn test_validate_amount() {
        assert_eq!(validate_amount(dec!(30), "amount").unwrap(), dec!(30));
        assert_eq!(validate_amount(dec!(12.50), "amount").unwrap(), dec!(12.5));
        assert!(validate_amount(Decimal::ZERO, "amount").is_err());
        assert!(validate_amount(dec!(-1), "amount").is_err());
        assert!(validate_amount(dec!(0.001), "amount").is_err());
        assert!(validate_amount(dec!(10000000000000), "amount").is_err());
    }

    #[test]
    fn test_validate_initial_balance() {
        assert_eq!(validate_initial_balance(Decimal::ZERO).unwrap(), Decimal::ZERO);
        assert_eq!(validate_initial_balance(dec!(100)).unwrap(), dec!(100));

        let err = validate_initial_balance(dec!(-0.01)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }
}
