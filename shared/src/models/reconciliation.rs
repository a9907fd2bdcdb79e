//! Stock reconciliation report rows

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MovementTotals, Product};
use crate::types::DateRange;

/// Where the movement totals of a report came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalsSource {
    /// Raw ledger scan
    Ledger,
    /// Daily aggregates up to the aggregation watermark, ledger afterwards
    DailyAggregates,
}

/// Ideal versus actual stock of one product over a date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRow {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit: String,
    pub start_quantity: Decimal,
    pub incoming: Decimal,
    pub sales: Decimal,
    pub return_waste: Decimal,
    pub total_consumed: Decimal,
    /// Sale returns in range; not part of the ideal figure
    pub sale_returns: Decimal,
    /// Net stocktaking corrections in range; not part of the ideal figure
    pub stocktaking_adjustments: Decimal,
    pub ideal_remaining: Decimal,
    pub actual_remaining_quantity: Decimal,
    pub deviation: Decimal,
    pub deviation_value: Decimal,
    pub deviation_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub range: DateRange,
    pub generated_at: DateTime<Utc>,
    pub source: TotalsSource,
    pub rows: Vec<ReconciliationRow>,
    pub total_deviation_value: Decimal,
}

/// Deviation as a percentage of the ideal remaining quantity, rounded to two
/// places. Zero when nothing was ideally left; `None` on overflow.
pub fn deviation_percentage(deviation: Decimal, ideal_remaining: Decimal) -> Option<Decimal> {
    if ideal_remaining.is_zero() {
        return Some(Decimal::ZERO);
    }
    deviation
        .checked_mul(Decimal::ONE_HUNDRED)?
        .checked_div(ideal_remaining)
        .map(|pct| pct.round_dp(2))
}

/// Build one report row, or `None` if a figure does not fit a `Decimal`.
///
/// `in_range` are the product's movement totals inside the range and
/// `actual_remaining` its cached quantity as of the end of the range.
pub fn reconcile(
    product: &Product,
    in_range: &MovementTotals,
    actual_remaining: Decimal,
) -> Option<ReconciliationRow> {
    let start_quantity = actual_remaining.checked_sub(in_range.net_delta)?;
    let incoming = in_range.purchased;
    let sales = in_range.sold;
    let return_waste = in_range.wasted.checked_add(in_range.purchase_returned)?;
    let total_consumed = sales.checked_add(return_waste)?;
    let ideal_remaining = start_quantity
        .checked_add(incoming)?
        .checked_sub(total_consumed)?;
    let deviation = ideal_remaining.checked_sub(actual_remaining)?;

    Some(ReconciliationRow {
        product_id: product.id,
        product_name: product.name.clone(),
        unit: product.unit.clone(),
        start_quantity,
        incoming,
        sales,
        return_waste,
        total_consumed,
        sale_returns: in_range.sale_returned,
        stocktaking_adjustments: in_range.stocktaking_adjusted,
        ideal_remaining,
        actual_remaining_quantity: actual_remaining,
        deviation,
        deviation_value: deviation.checked_mul(product.cost)?,
        deviation_percentage: deviation_percentage(deviation, ideal_remaining)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MovementReason;

    fn product(cost: i64) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Tomatoes".to_string(),
            unit: "kg".to_string(),
            cost: Decimal::from(cost),
            min_stock: Decimal::ZERO,
        }
    }

    #[test]
    fn test_reconcile_purchase_and_waste() {
        let mut totals = MovementTotals::default();
        totals.add(Decimal::from(50), MovementReason::Purchase);
        totals.add(Decimal::from(-20), MovementReason::Waste);

        let row = reconcile(&product(3), &totals, Decimal::from(130)).unwrap();
        assert_eq!(row.start_quantity, Decimal::from(100));
        assert_eq!(row.incoming, Decimal::from(50));
        assert_eq!(row.total_consumed, Decimal::from(20));
        assert_eq!(row.ideal_remaining, Decimal::from(130));
        assert_eq!(row.deviation, Decimal::ZERO);
        assert_eq!(row.deviation_percentage, Decimal::ZERO);
    }

    #[test]
    fn test_stocktaking_shortfall_shows_as_deviation() {
        let mut totals = MovementTotals::default();
        totals.add(Decimal::from(-4), MovementReason::StocktakingAdjustment);

        // 40 expected, 36 counted
        let row = reconcile(&product(5), &totals, Decimal::from(36)).unwrap();
        assert_eq!(row.start_quantity, Decimal::from(40));
        assert_eq!(row.ideal_remaining, Decimal::from(40));
        assert_eq!(row.deviation, Decimal::from(4));
        assert_eq!(row.deviation_value, Decimal::from(20));
        assert_eq!(row.deviation_percentage, Decimal::from(10));
        assert_eq!(row.stocktaking_adjustments, Decimal::from(-4));
    }

    #[test]
    fn test_deviation_percentage_guard() {
        assert_eq!(
            deviation_percentage(Decimal::from(5), Decimal::ZERO),
            Some(Decimal::ZERO)
        );
        assert_eq!(
            deviation_percentage(Decimal::ONE, Decimal::from(3)),
            Some(Decimal::new(3333, 2))
        );
        assert_eq!(deviation_percentage(Decimal::MAX, Decimal::ONE), None);
    }

    #[test]
    fn test_reconcile_overflow_yields_none() {
        let mut totals = MovementTotals::default();
        totals.add(Decimal::from(-4), MovementReason::StocktakingAdjustment);

        let mut pricey = product(1);
        pricey.cost = Decimal::MAX;
        assert!(reconcile(&pricey, &totals, Decimal::from(36)).is_none());
    }
}
