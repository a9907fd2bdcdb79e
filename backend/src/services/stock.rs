//! Stock cache reads: current quantities, point-in-time quantities, stock
//! levels and the ledger sum check

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{classify_stock, InventoryItem, Product, StockLevel};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{InventoryStore, MovementQuery};

#[derive(Clone)]
pub struct StockService {
    store: Arc<dyn InventoryStore>,
}

/// Cached quantity of a product together with its stock level
#[derive(Debug, Clone, Serialize)]
pub struct StockStatus {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit: String,
    pub quantity: Decimal,
    pub min_stock: Decimal,
    pub level: StockLevel,
    pub updated_at: DateTime<Utc>,
}

impl StockStatus {
    fn new(product: &Product, item: &InventoryItem) -> Self {
        Self {
            product_id: product.id,
            product_name: product.name.clone(),
            unit: product.unit.clone(),
            quantity: item.quantity,
            min_stock: product.min_stock,
            level: classify_stock(item.quantity, product.min_stock),
            updated_at: item.updated_at,
        }
    }
}

/// Cached quantity compared with the sum of the ledger
#[derive(Debug, Clone, Serialize)]
pub struct LedgerCheck {
    pub product_id: Uuid,
    pub cached: Decimal,
    pub ledger_sum: Decimal,
    pub movement_count: i64,
    pub consistent: bool,
}

impl StockService {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Current cached quantity, creating a zero record on first access
    pub async fn current_quantity(&self, product_id: Uuid) -> AppResult<Decimal> {
        Ok(self.store.inventory_item(product_id).await?.quantity)
    }

    /// Quantity as of `at`: the cache minus everything that happened since
    pub async fn quantity_at(&self, product_id: Uuid, at: DateTime<Utc>) -> AppResult<Decimal> {
        let item = self.store.inventory_item(product_id).await?;
        let query = MovementQuery::for_product(product_id).between(Some(at), None);
        let later = self.store.movement_totals(&query).await?;

        let since = later
            .get(&product_id)
            .map(|totals| totals.net_delta)
            .unwrap_or(Decimal::ZERO);
        Ok(item.quantity - since)
    }

    /// Compare the cache with the full ledger sum of one product
    pub async fn verify(&self, product_id: Uuid) -> AppResult<LedgerCheck> {
        let item = self.store.inventory_item(product_id).await?;
        let totals = self
            .store
            .movement_totals(&MovementQuery::for_product(product_id))
            .await?
            .remove(&product_id)
            .unwrap_or_default();

        let consistent = item.quantity == totals.net_delta;
        if !consistent {
            tracing::warn!(
                product_id = %product_id,
                cached = %item.quantity,
                ledger_sum = %totals.net_delta,
                "Stock cache disagrees with ledger"
            );
        }

        Ok(LedgerCheck {
            product_id,
            cached: item.quantity,
            ledger_sum: totals.net_delta,
            movement_count: totals.movement_count,
            consistent,
        })
    }

    pub async fn stock_level(&self, product_id: Uuid) -> AppResult<StockStatus> {
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or(AppError::UnknownProduct(product_id))?;
        let item = self.store.inventory_item(product_id).await?;
        Ok(StockStatus::new(&product, &item))
    }

    /// Products that are low or out of stock, most urgent first. Products
    /// that never had a movement count as zero.
    pub async fn low_stock(&self) -> AppResult<Vec<StockStatus>> {
        let products = self.store.list_products(None).await?;
        let items: HashMap<Uuid, InventoryItem> = self
            .store
            .inventory_items()
            .await?
            .into_iter()
            .map(|item| (item.product_id, item))
            .collect();
        let now = Utc::now();

        let mut alerts: Vec<StockStatus> = products
            .iter()
            .map(|product| {
                let item = items.get(&product.id).cloned().unwrap_or(InventoryItem {
                    product_id: product.id,
                    quantity: Decimal::ZERO,
                    updated_at: now,
                });
                StockStatus::new(product, &item)
            })
            .filter(|status| status.level != StockLevel::InStock)
            .collect();

        alerts.sort_by(|a, b| {
            let urgency = |level: StockLevel| match level {
                StockLevel::OutOfStock => 0,
                StockLevel::Low => 1,
                StockLevel::InStock => 2,
            };
            urgency(a.level)
                .cmp(&urgency(b.level))
                .then(a.product_name.cmp(&b.product_name))
        });
        Ok(alerts)
    }
}
