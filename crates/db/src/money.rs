//! Decimal <-> integer-cents conversion.
//!
//! The store keeps monetary values as integer minor units so the atomic
//! availability condition can be evaluated exactly in SQL. Amounts with more
//! than two decimal places are refused rather than silently rounded.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::repositories::RepositoryError;

pub fn decimal_to_cents(amount: Decimal) -> Result<i64, RepositoryError> {
    let scaled = amount * Decimal::from(100);
    if scaled.fract() != Decimal::ZERO {
        return Err(RepositoryError::Decode(format!(
            "amount {amount} has more than two decimal places"
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| RepositoryError::Decode(format!("amount {amount} out of range")))
}

pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
