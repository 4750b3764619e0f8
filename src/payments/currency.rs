//! Conversion between decimal amounts and the provider's integer minor units.

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

use crate::error::{AppError, AppResult};

/// Currencies the provider charges in whole units.
pub const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

pub fn is_zero_decimal(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(currency))
}

/// Upper-cases a three-letter ISO 4217 style code.
pub fn normalize_currency(currency: &str) -> AppResult<String> {
    let code = currency.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation(format!(
            "currency `{currency}` is not a three-letter code"
        )));
    }
    Ok(code.to_ascii_uppercase())
}

pub fn to_minor_units(amount: Decimal, currency: &str) -> AppResult<i64> {
    let scaled = if is_zero_decimal(currency) {
        amount
    } else {
        amount * Decimal::ONE_HUNDRED
    };
    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AppError::validation(format!("amount {amount} is out of range")))
}

/// Like [`to_minor_units`], but refuses amounts finer than the currency's smallest unit.
pub fn to_exact_minor_units(amount: Decimal, currency: &str) -> AppResult<i64> {
    let exponent = if is_zero_decimal(currency) { 0 } else { 2 };
    if amount.normalize().scale() > exponent {
        return Err(AppError::validation(format!(
            "amount {amount} has more precision than {currency} allows"
        )));
    }
    to_minor_units(amount, currency)
}

pub fn from_minor_units(minor: i64, currency: &str) -> Decimal {
    if is_zero_decimal(currency) {
        Decimal::from(minor)
    } else {
        Decimal::new(minor, 2)
    }
}
