//! Closing transaction tests
//!
//! - Exactly-once: one movement per non-zero line, never twice
//! - Per-kind delta and reason mapping
//! - Concurrent and stale closes
//! - A failed close leaves documents, ledger and cache untouched

mod common;

use chrono::Utc;
use common::*;
use rust_decimal::Decimal;
use shared::{
    DocumentKind, DocumentStatus, MovementOperation, MovementReason, MovementSource, NewMovement,
};
use std::sync::Arc;
use stockroom_backend::services::closing::ClosingService;
use stockroom_backend::services::documents::DocumentService;
use stockroom_backend::services::stock::StockService;
use stockroom_backend::store::{CloseCommit, MovementQuery};
use stockroom_backend::{AppError, InventoryStore};
use uuid::Uuid;

async fn ledger_len(store: &Arc<dyn InventoryStore>) -> usize {
    store.movements(&MovementQuery::default()).await.unwrap().len()
}

#[tokio::test]
async fn test_close_writes_one_movement_per_line() {
    let tomato = product("Tomatoes", "2", "0");
    let onion = product("Onions", "1", "0");
    let (_, store) = store_with(vec![tomato.clone(), onion.clone()]);
    let documents = DocumentService::new(store.clone());
    let closing = ClosingService::new(store.clone());
    let stock = StockService::new(store.clone());
    let actor = Uuid::new_v4();

    let invoice = documents
        .create(
            DocumentKind::PurchaseInvoice,
            actor,
            with_items(vec![
                item(tomato.id, "10", "2"),
                item(onion.id, "5", "1"),
                item(tomato.id, "2", "2"),
            ]),
        )
        .await
        .unwrap();

    let closed = closing
        .close(DocumentKind::PurchaseInvoice, invoice.id, actor)
        .await
        .unwrap();

    assert_eq!(closed.document.status, DocumentStatus::Closed);
    assert_eq!(closed.document.closed_by, Some(actor));
    assert!(closed.document.closed_at.is_some());
    assert_eq!(closed.document.total, dec("29"));
    assert_eq!(closed.movements.len(), 3);
    assert!(closed.movements.iter().all(|m| {
        m.reason == MovementReason::Purchase
            && m.source == MovementSource::PurchaseInvoice(invoice.id)
            && m.actor_id == actor
    }));
    assert_eq!(ledger_len(&store).await, 3);
    assert_eq!(stock.current_quantity(tomato.id).await.unwrap(), dec("12"));
    assert_eq!(stock.current_quantity(onion.id).await.unwrap(), dec("5"));
}

#[tokio::test]
async fn test_second_close_is_rejected_and_writes_nothing() {
    let flour = product("Flour", "1", "0");
    let (_, store) = store_with(vec![flour.clone()]);
    let documents = DocumentService::new(store.clone());
    let closing = ClosingService::new(store.clone());
    let actor = Uuid::new_v4();
    let kind = DocumentKind::Waste;

    opening_stock(&store, flour.id, "10", Utc::now()).await;
    let waste = documents
        .create(kind, actor, with_items(vec![item(flour.id, "4", "1")]))
        .await
        .unwrap();
    let first = closing.close(kind, waste.id, actor).await.unwrap();

    let again = closing.close(kind, waste.id, Uuid::new_v4()).await;
    assert!(matches!(again, Err(AppError::AlreadyClosed { id, .. }) if id == waste.id));

    assert_eq!(ledger_len(&store).await, 2);
    let stored = documents.get(kind, waste.id).await.unwrap();
    assert_eq!(stored.closed_by, Some(actor));
    assert_eq!(stored.closed_at, first.document.closed_at);
    assert_eq!(
        StockService::new(store).current_quantity(flour.id).await.unwrap(),
        dec("6")
    );
}

#[tokio::test]
async fn test_delta_and_reason_by_kind() {
    let butter = product("Butter", "5", "0");
    let (_, store) = store_with(vec![butter.clone()]);
    let documents = DocumentService::new(store.clone());
    let closing = ClosingService::new(store.clone());
    let actor = Uuid::new_v4();

    opening_stock(&store, butter.id, "100", Utc::now()).await;

    let cases = [
        (DocumentKind::PurchaseInvoice, "7", "7", MovementReason::Purchase),
        (DocumentKind::ReturnPurchaseInvoice, "2", "-2", MovementReason::PurchaseReturn),
        (DocumentKind::Waste, "3", "-3", MovementReason::Waste),
    ];
    for (kind, quantity, delta, reason) in cases {
        let document = documents
            .create(kind, actor, with_items(vec![item(butter.id, quantity, "5")]))
            .await
            .unwrap();
        let closed = closing.close(kind, document.id, actor).await.unwrap();

        assert_eq!(closed.movements.len(), 1, "{kind}");
        let movement = &closed.movements[0];
        assert_eq!(movement.delta, dec(delta), "{kind}");
        assert_eq!(movement.reason, reason, "{kind}");
        assert_eq!(movement.source, kind.source(document.id), "{kind}");
        assert_eq!(
            movement.operation,
            MovementOperation::for_delta(dec(delta)).unwrap()
        );
    }

    let quantity = StockService::new(store).current_quantity(butter.id).await.unwrap();
    assert_eq!(quantity, dec("102"));
}

#[tokio::test]
async fn test_stocktaking_adjusts_by_difference_and_skips_zero() {
    let rice = product("Rice", "2", "0");
    let beans = product("Beans", "3", "0");
    let (_, store) = store_with(vec![rice.clone(), beans.clone()]);
    let documents = DocumentService::new(store.clone());
    let closing = ClosingService::new(store.clone());
    let stock = StockService::new(store.clone());
    let actor = Uuid::new_v4();
    let now = Utc::now();

    opening_stock(&store, rice.id, "40", now).await;
    opening_stock(&store, beans.id, "12", now).await;

    let count = documents
        .create(
            DocumentKind::Stocktaking,
            actor,
            with_items(vec![item(rice.id, "36", "2"), item(beans.id, "12", "3")]),
        )
        .await
        .unwrap();
    let closed = closing
        .close(DocumentKind::Stocktaking, count.id, actor)
        .await
        .unwrap();

    // Beans counted exactly as booked: no movement
    assert_eq!(closed.movements.len(), 1);
    assert_eq!(closed.movements[0].product_id, rice.id);
    assert_eq!(closed.movements[0].delta, dec("-4"));
    assert_eq!(closed.movements[0].reason, MovementReason::StocktakingAdjustment);
    assert_eq!(stock.current_quantity(rice.id).await.unwrap(), dec("36"));
    assert_eq!(stock.current_quantity(beans.id).await.unwrap(), dec("12"));
}

#[tokio::test]
async fn test_empty_document_closes_without_movements() {
    let (_, store) = store_with(vec![]);
    let documents = DocumentService::new(store.clone());
    let closing = ClosingService::new(store.clone());
    let actor = Uuid::new_v4();

    let waste = documents
        .create(DocumentKind::Waste, actor, with_items(vec![]))
        .await
        .unwrap();
    let closed = closing.close(DocumentKind::Waste, waste.id, actor).await.unwrap();

    assert!(closed.movements.is_empty());
    assert_eq!(closed.document.status, DocumentStatus::Closed);
    assert_eq!(ledger_len(&store).await, 0);

    let missing = closing
        .close(DocumentKind::Waste, Uuid::new_v4(), actor)
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_closes_succeed_once() {
    let salt = product("Salt", "1", "0");
    let (_, store) = store_with(vec![salt.clone()]);
    let documents = DocumentService::new(store.clone());
    let actor = Uuid::new_v4();

    let invoice = documents
        .create(
            DocumentKind::PurchaseInvoice,
            actor,
            with_items(vec![item(salt.id, "5", "1"), item(salt.id, "3", "1")]),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let closing = ClosingService::new(store.clone());
        let id = invoice.id;
        handles.push(tokio::spawn(async move {
            closing
                .close(DocumentKind::PurchaseInvoice, id, Uuid::new_v4())
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::AlreadyClosed { .. }) | Err(AppError::ConcurrencyConflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(ledger_len(&store).await, 2);
    assert_eq!(
        StockService::new(store).current_quantity(salt.id).await.unwrap(),
        dec("8")
    );
}

#[tokio::test]
async fn test_close_against_stale_version_conflicts() {
    let milk = product("Milk", "1", "0");
    let (_, store) = store_with(vec![milk.clone()]);
    let documents = DocumentService::new(store.clone());
    let actor = Uuid::new_v4();
    let kind = DocumentKind::PurchaseInvoice;

    let invoice = documents
        .create(kind, actor, with_items(vec![item(milk.id, "5", "1")]))
        .await
        .unwrap();
    // Edited after the closer read version 1
    documents
        .add_item(kind, invoice.id, item(milk.id, "1", "1"))
        .await
        .unwrap();

    let result = store
        .commit_close(CloseCommit {
            kind,
            document_id: invoice.id,
            expected_version: invoice.version,
            movements: shared::close_movements(&invoice, actor, Utc::now()),
            total: invoice.total,
            closed_at: Utc::now(),
            closed_by: actor,
        })
        .await;

    assert!(matches!(result, Err(AppError::ConcurrencyConflict(_))));
    assert_eq!(ledger_len(&store).await, 0);
    assert_eq!(
        documents.get(kind, invoice.id).await.unwrap().status,
        DocumentStatus::Open
    );
}

#[tokio::test]
async fn test_failed_close_rolls_back() {
    let eggs = product("Eggs", "1", "0");
    let (_, store) = store_with(vec![eggs.clone()]);
    let documents = DocumentService::new(store.clone());
    let actor = Uuid::new_v4();
    let kind = DocumentKind::PurchaseInvoice;

    let invoice = documents
        .create(kind, actor, with_items(vec![item(eggs.id, "12", "1")]))
        .await
        .unwrap();

    // The second movement points at a product that does not exist
    let mut movements = shared::close_movements(&invoice, actor, Utc::now());
    let ghost = Uuid::new_v4();
    movements.push(NewMovement {
        product_id: ghost,
        delta: Decimal::ONE,
        ..movements[0].clone()
    });

    let result = store
        .commit_close(CloseCommit {
            kind,
            document_id: invoice.id,
            expected_version: invoice.version,
            movements,
            total: invoice.total,
            closed_at: Utc::now(),
            closed_by: actor,
        })
        .await;

    assert!(matches!(result, Err(AppError::UnknownProduct(id)) if id == ghost));
    assert_eq!(ledger_len(&store).await, 0);
    assert!(store.inventory_items().await.unwrap().is_empty());

    let stored = documents.get(kind, invoice.id).await.unwrap();
    assert_eq!(stored.status, DocumentStatus::Open);
    assert!(stored.closed_at.is_none());

    // The document can still be closed normally
    let closed = ClosingService::new(store.clone())
        .close(kind, invoice.id, actor)
        .await
        .unwrap();
    assert_eq!(closed.movements.len(), 1);
}

#[tokio::test]
async fn test_repeated_product_lines_accumulate() {
    let rice = product("Rice", "2", "0");
    let (_, store) = store_with(vec![rice.clone()]);
    let documents = DocumentService::new(store.clone());
    let stock = StockService::new(store.clone());
    let actor = Uuid::new_v4();
    opening_stock(&store, rice.id, "10", Utc::now()).await;

    let waste = documents
        .create(
            DocumentKind::Waste,
            actor,
            with_items(vec![item(rice.id, "3", "2"), item(rice.id, "4", "2")]),
        )
        .await
        .unwrap();
    let closed = ClosingService::new(store.clone())
        .close(DocumentKind::Waste, waste.id, actor)
        .await
        .unwrap();

    let sequences: Vec<i64> = closed.movements.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![2, 3]);
    assert_eq!(stock.current_quantity(rice.id).await.unwrap(), dec("3"));
    assert!(stock.verify(rice.id).await.unwrap().consistent);
}
