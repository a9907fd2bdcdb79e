//! Product catalog entries and stock cache records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stocked product, owned by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// Unit of measure (e.g. "kg", "pcs", "l")
    pub unit: String,
    /// Current unit cost, snapshotted onto every movement
    pub cost: Decimal,
    pub min_stock: Decimal,
}

/// Cached current quantity of one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Stock level classification against a product's minimum stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    InStock,
    Low,
    OutOfStock,
}

/// Classify a quantity. Anything at or below zero (including oversold,
/// negative balances) is out of stock.
pub fn classify_stock(quantity: Decimal, min_stock: Decimal) -> StockLevel {
    if quantity <= Decimal::ZERO {
        StockLevel::OutOfStock
    } else if quantity <= min_stock {
        StockLevel::Low
    } else {
        StockLevel::InStock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stock() {
        let min = Decimal::from(10);
        assert_eq!(classify_stock(Decimal::from(11), min), StockLevel::InStock);
        assert_eq!(classify_stock(Decimal::from(10), min), StockLevel::Low);
        assert_eq!(classify_stock(Decimal::new(1, 1), min), StockLevel::Low);
        assert_eq!(classify_stock(Decimal::ZERO, min), StockLevel::OutOfStock);
        assert_eq!(classify_stock(Decimal::from(-3), min), StockLevel::OutOfStock);
    }

    #[test]
    fn test_zero_min_stock_never_low() {
        assert_eq!(
            classify_stock(Decimal::new(1, 2), Decimal::ZERO),
            StockLevel::InStock
        );
    }
}
