//! Commission arithmetic.
//!
//! All intermediate math runs on `Decimal` and is rounded half-away-from-zero
//! to two places before anything is stored or summed, so a multi-item order's
//! totals always equal the sum of its already-rounded lines. Floats only
//! appear at the storage and API boundary.

use rust_decimal::prelude::*;

use crate::error::AppError;

/// Platform cut applied to every item line unless configured otherwise.
pub const DEFAULT_COMMISSION_RATE: f64 = 0.05;

/// Per-line settlement amounts, already rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemAmounts {
    pub total_price: f64,
    pub commission_amount: f64,
    pub seller_payout: f64,
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn to_f64(value: Decimal) -> Result<f64, AppError> {
    value
        .to_f64()
        .ok_or_else(|| AppError::internal("amount not representable as f64"))
}

/// Compute the settlement split for one order line.
pub fn item_amounts(unit_price: f64, quantity: i64, rate: f64) -> Result<ItemAmounts, AppError> {
    if !unit_price.is_finite() || unit_price < 0.0 {
        return Err(AppError::validation("Invalid unit price"));
    }
    if quantity <= 0 {
        return Err(AppError::validation("Quantity must be positive"));
    }
    if !(0.0..1.0).contains(&rate) {
        return Err(AppError::validation("Invalid commission rate"));
    }

    let unit = Decimal::from_f64(unit_price)
        .ok_or_else(|| AppError::validation("Invalid unit price"))?;
    let rate = Decimal::from_f64(rate)
        .ok_or_else(|| AppError::validation("Invalid commission rate"))?;

    let total = round2(unit * Decimal::from(quantity));
    let commission = round2(total * rate);
    let payout = total - commission;

    Ok(ItemAmounts {
        total_price: to_f64(total)?,
        commission_amount: to_f64(commission)?,
        seller_payout: to_f64(payout)?,
    })
}

/// Sum already-rounded line amounts without reintroducing float drift.
pub fn sum_amounts(values: impl IntoIterator<Item = f64>) -> Result<f64, AppError> {
    let mut total = Decimal::ZERO;
    for v in values {
        total += Decimal::from_f64(v).ok_or_else(|| AppError::internal("non-finite amount"))?;
    }
    to_f64(total)
}

/// Convert a rounded major-unit amount to minor units (cents) for the
/// payment gateway.
pub fn to_minor_units(amount: f64) -> Result<i64, AppError> {
    let dec = Decimal::from_f64(amount).ok_or_else(|| AppError::internal("non-finite amount"))?;
    round2(dec * Decimal::from(100))
        .to_i64()
        .ok_or_else(|| AppError::internal("amount out of range for minor units"))
}
