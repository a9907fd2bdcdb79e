//! Validation utilities for document lines and report ranges

use rust_decimal::Decimal;

use crate::models::DocumentKind;
use crate::types::DateRange;

/// Largest quantity a single line or movement may carry
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// Largest unit price a single line may carry
pub const MAX_UNIT_PRICE: i64 = 1_000_000_000;

/// Validate a moved or counted quantity
pub fn validate_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Quantity cannot be negative");
    }
    if quantity > Decimal::from(MAX_QUANTITY) {
        return Err("Quantity is too large");
    }
    Ok(())
}

/// Validate a unit price or cost
pub fn validate_unit_price(unit_price: Decimal) -> Result<(), &'static str> {
    if unit_price < Decimal::ZERO {
        return Err("Unit price cannot be negative");
    }
    if unit_price > Decimal::from(MAX_UNIT_PRICE) {
        return Err("Unit price is too large");
    }
    Ok(())
}

/// Validate the size of a signed movement delta
pub fn validate_delta(delta: Decimal) -> Result<(), &'static str> {
    if delta.abs() > Decimal::from(MAX_QUANTITY) {
        return Err("Movement delta is too large");
    }
    Ok(())
}

/// Validate that a stock snapshot is only given where the kind records one.
/// The snapshot itself may be negative (oversold stock).
pub fn validate_stock_snapshot(
    kind: DocumentKind,
    stock_quantity: Option<Decimal>,
) -> Result<(), &'static str> {
    match (kind.has_stock_snapshot(), stock_quantity) {
        (false, Some(_)) => Err("Only stocktaking lines carry a stock quantity"),
        (true, Some(snapshot)) if snapshot.abs() > Decimal::from(MAX_QUANTITY) => {
            Err("Stock quantity is too large")
        }
        _ => Ok(()),
    }
}

/// Validate a report range
pub fn validate_date_range(range: &DateRange) -> Result<(), &'static str> {
    if range.from > range.to {
        return Err("Range start must not be after its end");
    }
    Ok(())
}
