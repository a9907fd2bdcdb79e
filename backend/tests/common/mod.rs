//! Helpers shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    day_start, Movement, MovementOperation, MovementReason, MovementSource, Product,
};
use std::str::FromStr;
use std::sync::Arc;
use stockroom_backend::services::ledger::{LedgerService, RecordMovementInput};
use stockroom_backend::services::documents::{CreateDocumentInput, DocumentItemInput};
use stockroom_backend::store::MemoryStore;
use stockroom_backend::InventoryStore;
use uuid::Uuid;

// Helper to create Decimal from string
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Noon (UTC) of `day`
pub fn noon(day: NaiveDate) -> DateTime<Utc> {
    day_start(day) + Duration::hours(12)
}

pub fn product(name: &str, cost: &str, min_stock: &str) -> Product {
    Product {
        id: Uuid::new_v4(),
        name: name.to_string(),
        unit: "kg".to_string(),
        cost: dec(cost),
        min_stock: dec(min_stock),
    }
}

/// A memory store holding `products`, both as its concrete type and as the
/// trait object services take
pub fn store_with(products: Vec<Product>) -> (Arc<MemoryStore>, Arc<dyn InventoryStore>) {
    let memory = Arc::new(MemoryStore::with_products(products));
    let store: Arc<dyn InventoryStore> = memory.clone();
    (memory, store)
}

/// Record a signed movement at a given instant
pub async fn movement_at(
    store: &Arc<dyn InventoryStore>,
    product_id: Uuid,
    delta: &str,
    reason: MovementReason,
    at: DateTime<Utc>,
) -> Movement {
    let delta = dec(delta);
    let operation = MovementOperation::for_delta(delta).unwrap();
    LedgerService::new(store.clone())
        .record(
            Uuid::new_v4(),
            RecordMovementInput {
                product_id,
                delta,
                operation,
                reason,
                source: MovementSource::Order(Uuid::new_v4()),
                occurred_at: Some(at),
            },
        )
        .await
        .unwrap()
}

/// Opening stock, booked as a stocktaking adjustment at `at`
pub async fn opening_stock(
    store: &Arc<dyn InventoryStore>,
    product_id: Uuid,
    quantity: &str,
    at: DateTime<Utc>,
) -> Movement {
    movement_at(store, product_id, quantity, MovementReason::StocktakingAdjustment, at).await
}

pub fn item(product_id: Uuid, quantity: &str, unit_price: &str) -> DocumentItemInput {
    DocumentItemInput {
        product_id,
        quantity: dec(quantity),
        unit_price: dec(unit_price),
        stock_quantity: None,
    }
}

pub fn with_items(items: Vec<DocumentItemInput>) -> CreateDocumentInput {
    CreateDocumentInput {
        items,
        ..CreateDocumentInput::default()
    }
}
