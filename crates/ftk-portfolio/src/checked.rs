//! Overflow-checked Decimal arithmetic.
//!
//! `Decimal`'s operators panic past ±7.9e28. Every sum or product built from
//! caller input goes through here and turns overflow into a validation error
//! naming the field.

use rust_decimal::Decimal;

use crate::error::TradeError;

pub(crate) fn mul(field: &'static str, a: Decimal, b: Decimal) -> Result<Decimal, TradeError> {
    a.checked_mul(b)
        .ok_or_else(|| TradeError::validation(field, format!("{a} * {b} overflows")))
}

pub(crate) fn add(field: &'static str, a: Decimal, b: Decimal) -> Result<Decimal, TradeError> {
    a.checked_add(b)
        .ok_or_else(|| TradeError::validation(field, format!("{a} + {b} overflows")))
}

pub(crate) fn sub(field: &'static str, a: Decimal, b: Decimal) -> Result<Decimal, TradeError> {
    a.checked_sub(b)
        .ok_or_else(|| TradeError::validation(field, format!("{a} - {b} overflows")))
}

pub(crate) fn sum<I>(field: &'static str, items: I) -> Result<Decimal, TradeError>
where
    I: IntoIterator<Item = Decimal>,
{
    items
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, x| add(field, acc, x))
}
