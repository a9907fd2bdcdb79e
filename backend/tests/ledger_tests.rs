//! Movement ledger and stock cache tests
//!
//! - Recording moves the stock cache with the ledger
//! - Malformed movements are rejected before anything is written
//! - Property: cached quantity always equals the ledger sum

mod common;

use chrono::{Duration, Utc};
use common::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{MovementOperation, MovementReason, MovementSource};
use stockroom_backend::services::ledger::{LedgerService, RecordMovementInput};
use stockroom_backend::services::stock::StockService;
use stockroom_backend::store::MovementQuery;
use stockroom_backend::{AppError, InventoryStore};
use uuid::Uuid;

fn input(
    product_id: Uuid,
    delta: &str,
    operation: MovementOperation,
    reason: MovementReason,
) -> RecordMovementInput {
    RecordMovementInput {
        product_id,
        delta: dec(delta),
        operation,
        reason,
        source: MovementSource::Order(Uuid::new_v4()),
        occurred_at: None,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[tokio::test]
async fn test_record_updates_cache_and_snapshots_cost() {
    let flour = product("Flour", "1.25", "5");
    let (_, store) = store_with(vec![flour.clone()]);
    let ledger = LedgerService::new(store.clone());
    let stock = StockService::new(store.clone());
    let actor = Uuid::new_v4();

    let movement = ledger
        .record(actor, input(flour.id, "40", MovementOperation::Increment, MovementReason::Purchase))
        .await
        .unwrap();

    assert_eq!(movement.unit_cost, dec("1.25"));
    assert_eq!(movement.actor_id, actor);
    assert_eq!(stock.current_quantity(flour.id).await.unwrap(), dec("40"));
    assert_eq!(ledger.movement(movement.id).await.unwrap(), movement);
}

#[tokio::test]
async fn test_unknown_product_writes_nothing() {
    let (_, store) = store_with(vec![]);
    let ledger = LedgerService::new(store.clone());
    let missing = Uuid::new_v4();

    let err = ledger
        .record(Uuid::new_v4(), input(missing, "1", MovementOperation::Increment, MovementReason::Purchase))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UnknownProduct(id) if id == missing));
    assert!(store.movements(&MovementQuery::default()).await.unwrap().is_empty());
    assert!(store.inventory_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_delta_is_rejected() {
    let sugar = product("Sugar", "1", "0");
    let (_, store) = store_with(vec![sugar.clone()]);
    let ledger = LedgerService::new(store.clone());

    let result = ledger
        .record(
            Uuid::new_v4(),
            input(
                sugar.id,
                "-1000000000.5",
                MovementOperation::Decrement,
                MovementReason::Waste,
            ),
        )
        .await;

    assert!(matches!(result, Err(AppError::InvalidQuantity { ref field, .. }) if field == "delta"));
    assert!(store.movements(&MovementQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_movements_are_rejected() {
    let salt = product("Salt", "0.5", "0");
    let (_, store) = store_with(vec![salt.clone()]);
    let ledger = LedgerService::new(store.clone());
    let actor = Uuid::new_v4();

    let zero = ledger
        .record(actor, input(salt.id, "0", MovementOperation::Increment, MovementReason::Purchase))
        .await;
    assert!(matches!(zero, Err(AppError::InvalidQuantity { .. })));

    let wrong_sign = ledger
        .record(actor, input(salt.id, "5", MovementOperation::Decrement, MovementReason::Waste))
        .await;
    assert!(matches!(wrong_sign, Err(AppError::InvalidQuantity { .. })));

    let wrong_direction = ledger
        .record(actor, input(salt.id, "5", MovementOperation::Increment, MovementReason::Waste))
        .await;
    assert!(matches!(wrong_direction, Err(AppError::Validation { ref field, .. }) if field == "reason"));

    assert!(store.movements(&MovementQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sale_and_sale_return() {
    let milk = product("Milk", "0.9", "2");
    let (_, store) = store_with(vec![milk.clone()]);
    let ledger = LedgerService::new(store.clone());
    let actor = Uuid::new_v4();
    let order = Uuid::new_v4();

    ledger
        .record(actor, input(milk.id, "10", MovementOperation::Increment, MovementReason::Purchase))
        .await
        .unwrap();
    let sale = ledger.record_sale(actor, order, milk.id, dec("3")).await.unwrap();
    let refund = ledger
        .record_sale_return(actor, order, milk.id, dec("1"))
        .await
        .unwrap();

    assert_eq!(sale.delta, dec("-3"));
    assert_eq!(sale.reason, MovementReason::SaleConsumption);
    assert_eq!(sale.source, MovementSource::Order(order));
    assert_eq!(refund.delta, dec("1"));
    assert_eq!(refund.source, MovementSource::OrderReturn(order));

    let quantity = StockService::new(store).current_quantity(milk.id).await.unwrap();
    assert_eq!(quantity, dec("8"));
}

#[tokio::test]
async fn test_movements_for_orders_by_occurrence_and_filters_range() {
    let rice = product("Rice", "2", "0");
    let (_, store) = store_with(vec![rice.clone()]);
    let ledger = LedgerService::new(store.clone());

    // Recorded out of occurrence order
    let d3 = movement_at(&store, rice.id, "3", MovementReason::Purchase, noon(date(2024, 3, 3))).await;
    let d1 = movement_at(&store, rice.id, "1", MovementReason::Purchase, noon(date(2024, 3, 1))).await;
    let d2 = movement_at(&store, rice.id, "2", MovementReason::Purchase, noon(date(2024, 3, 2))).await;

    let all = ledger.movements_for(rice.id, None, None).await.unwrap();
    let ids: Vec<Uuid> = all.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![d1.id, d2.id, d3.id]);

    let middle = ledger
        .movements_for(
            rice.id,
            Some(shared::day_start(date(2024, 3, 2))),
            Some(shared::day_end(date(2024, 3, 2))),
        )
        .await
        .unwrap();
    assert_eq!(middle.len(), 1);
    assert_eq!(middle[0].id, d2.id);

    let missing = ledger.movements_for(Uuid::new_v4(), None, None).await;
    assert!(matches!(missing, Err(AppError::UnknownProduct(_))));
}

#[tokio::test]
async fn test_quantity_at_and_verify() {
    let oil = product("Oil", "4", "1");
    let (_, store) = store_with(vec![oil.clone()]);
    let stock = StockService::new(store.clone());
    let now = Utc::now();

    opening_stock(&store, oil.id, "20", now - Duration::days(3)).await;
    movement_at(&store, oil.id, "-5", MovementReason::Waste, now - Duration::days(1)).await;

    assert_eq!(stock.quantity_at(oil.id, now - Duration::days(2)).await.unwrap(), dec("20"));
    assert_eq!(stock.current_quantity(oil.id).await.unwrap(), dec("15"));

    let check = stock.verify(oil.id).await.unwrap();
    assert!(check.consistent);
    assert_eq!(check.ledger_sum, dec("15"));
    assert_eq!(check.movement_count, 2);
}

#[tokio::test]
async fn test_first_read_creates_zero_item() {
    let sugar = product("Sugar", "1", "0");
    let (_, store) = store_with(vec![sugar.clone()]);
    let stock = StockService::new(store.clone());

    assert!(store.inventory_items().await.unwrap().is_empty());
    assert_eq!(stock.current_quantity(sugar.id).await.unwrap(), Decimal::ZERO);
    assert_eq!(store.inventory_items().await.unwrap().len(), 1);

    let unknown = stock.current_quantity(Uuid::new_v4()).await;
    assert!(matches!(unknown, Err(AppError::UnknownProduct(_))));
}

#[tokio::test]
async fn test_low_stock_classification() {
    let plenty = product("Beans", "1", "5");
    let low = product("Cream", "1", "5");
    let empty = product("Eggs", "1", "5");
    let (_, store) = store_with(vec![plenty.clone(), low.clone(), empty.clone()]);
    let now = Utc::now();

    opening_stock(&store, plenty.id, "6", now).await;
    opening_stock(&store, low.id, "5", now).await;

    let stock = StockService::new(store);
    let alerts = stock.low_stock().await.unwrap();
    let ids: Vec<Uuid> = alerts.iter().map(|a| a.product_id).collect();
    assert_eq!(ids, vec![empty.id, low.id]);
    assert_eq!(alerts[0].level, shared::StockLevel::OutOfStock);
    assert_eq!(alerts[1].level, shared::StockLevel::Low);
    assert_eq!(
        stock.stock_level(plenty.id).await.unwrap().level,
        shared::StockLevel::InStock
    );
}

// ============================================================================
// Property Tests
// ============================================================================

/// A non-zero signed movement with a reason that fits its direction
fn movement_strategy() -> impl Strategy<Value = (i64, MovementReason)> {
    prop_oneof![
        (1i64..500).prop_map(|q| (q, MovementReason::Purchase)),
        (1i64..500).prop_map(|q| (q, MovementReason::SaleReturn)),
        (1i64..500).prop_map(|q| (-q, MovementReason::SaleConsumption)),
        (1i64..500).prop_map(|q| (-q, MovementReason::Waste)),
        (1i64..500).prop_map(|q| (-q, MovementReason::PurchaseReturn)),
        (1i64..500).prop_map(|q| (q, MovementReason::StocktakingAdjustment)),
        (1i64..500).prop_map(|q| (-q, MovementReason::StocktakingAdjustment)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Cached quantity equals the sum of all recorded deltas
    #[test]
    fn prop_cache_equals_ledger_sum(
        movements in prop::collection::vec((0usize..3, movement_strategy()), 1..40)
    ) {
        let products = vec![
            product("A", "1", "0"),
            product("B", "2", "0"),
            product("C", "3", "0"),
        ];
        let (_, store) = store_with(products.clone());

        tokio_test::block_on(async {
            let ledger = LedgerService::new(store.clone());
            let stock = StockService::new(store.clone());

            for (index, (delta, reason)) in &movements {
                let delta = Decimal::from(*delta);
                let operation = MovementOperation::for_delta(delta).unwrap();
                ledger
                    .record(
                        Uuid::new_v4(),
                        RecordMovementInput {
                            product_id: products[*index].id,
                            delta,
                            operation,
                            reason: *reason,
                            source: MovementSource::Order(Uuid::new_v4()),
                            occurred_at: None,
                        },
                    )
                    .await
                    .unwrap();
            }

            for (index, product) in products.iter().enumerate() {
                let expected: i64 = movements
                    .iter()
                    .filter(|(i, _)| *i == index)
                    .map(|(_, (delta, _))| *delta)
                    .sum();
                let recorded: Decimal = ledger
                    .movements_for(product.id, None, None)
                    .await
                    .unwrap()
                    .iter()
                    .map(|m| m.delta)
                    .sum();

                let cached = stock.current_quantity(product.id).await.unwrap();
                assert_eq!(cached, Decimal::from(expected));
                assert_eq!(cached, recorded);
                assert!(stock.verify(product.id).await.unwrap().consistent);
            }
        });
    }
}
