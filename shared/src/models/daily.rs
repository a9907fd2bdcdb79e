//! Per-period movement totals and the daily aggregate rows built from them

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MovementReason;

/// Movement totals of one product over some period.
///
/// Shrinkage and consumption figures (`purchase_returned`, `wasted`, `sold`)
/// are absolute values; `stocktaking_adjusted` and `net_delta` are signed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementTotals {
    pub increments: Decimal,
    pub decrements: Decimal,
    pub net_delta: Decimal,
    pub purchased: Decimal,
    pub purchase_returned: Decimal,
    pub wasted: Decimal,
    pub sold: Decimal,
    pub sale_returned: Decimal,
    pub stocktaking_adjusted: Decimal,
    pub movement_count: i64,
}

impl MovementTotals {
    pub fn add(&mut self, delta: Decimal, reason: MovementReason) {
        if delta > Decimal::ZERO {
            self.increments += delta;
        } else {
            self.decrements -= delta;
        }
        self.net_delta += delta;
        self.movement_count += 1;

        match reason {
            MovementReason::Purchase => self.purchased += delta,
            MovementReason::PurchaseReturn => self.purchase_returned -= delta,
            MovementReason::Waste => self.wasted -= delta,
            MovementReason::SaleConsumption => self.sold -= delta,
            MovementReason::SaleReturn => self.sale_returned += delta,
            MovementReason::StocktakingAdjustment => self.stocktaking_adjusted += delta,
        }
    }

    pub fn merge(&mut self, other: &MovementTotals) {
        self.increments += other.increments;
        self.decrements += other.decrements;
        self.net_delta += other.net_delta;
        self.purchased += other.purchased;
        self.purchase_returned += other.purchase_returned;
        self.wasted += other.wasted;
        self.sold += other.sold;
        self.sale_returned += other.sale_returned;
        self.stocktaking_adjusted += other.stocktaking_adjusted;
        self.movement_count += other.movement_count;
    }
}

/// Daily rollup of one product's ledger entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMovement {
    pub product_id: Uuid,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub totals: MovementTotals,
    /// Cached quantity as of the end of `date`
    pub closing_quantity: Decimal,
    pub aggregated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_split_by_reason() {
        let mut totals = MovementTotals::default();
        totals.add(Decimal::from(50), MovementReason::Purchase);
        totals.add(Decimal::from(-20), MovementReason::Waste);
        totals.add(Decimal::from(-5), MovementReason::PurchaseReturn);
        totals.add(Decimal::from(-8), MovementReason::SaleConsumption);
        totals.add(Decimal::from(2), MovementReason::SaleReturn);
        totals.add(Decimal::from(-1), MovementReason::StocktakingAdjustment);

        assert_eq!(totals.increments, Decimal::from(52));
        assert_eq!(totals.decrements, Decimal::from(34));
        assert_eq!(totals.net_delta, Decimal::from(18));
        assert_eq!(totals.purchased, Decimal::from(50));
        assert_eq!(totals.wasted, Decimal::from(20));
        assert_eq!(totals.purchase_returned, Decimal::from(5));
        assert_eq!(totals.sold, Decimal::from(8));
        assert_eq!(totals.sale_returned, Decimal::from(2));
        assert_eq!(totals.stocktaking_adjusted, Decimal::from(-1));
        assert_eq!(totals.movement_count, 6);
    }

    #[test]
    fn test_merge_equals_single_fold() {
        let mut a = MovementTotals::default();
        a.add(Decimal::from(3), MovementReason::Purchase);
        let mut b = MovementTotals::default();
        b.add(Decimal::from(-1), MovementReason::Waste);

        let mut both = MovementTotals::default();
        both.add(Decimal::from(3), MovementReason::Purchase);
        both.add(Decimal::from(-1), MovementReason::Waste);

        a.merge(&b);
        assert_eq!(a, both);
    }
}
