//! Movement ledger service
//!
//! The only way to write a movement outside of closing a document. Every
//! recorded movement moves the stock cache in the same store transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{
    check_movement, validate_delta, Movement, MovementOperation, MovementReason, MovementSource,
    NewMovement,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{InventoryStore, MovementQuery};

/// Ledger service for recording and reading movements
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn InventoryStore>,
}

/// Input for recording a movement
#[derive(Debug, Clone, Deserialize)]
pub struct RecordMovementInput {
    pub product_id: Uuid,
    pub delta: Decimal,
    pub operation: MovementOperation,
    pub reason: MovementReason,
    pub source: MovementSource,
    /// Defaults to now
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Map a malformed movement to the matching error. A sign problem is a
/// quantity error; a reason that cannot go this way is a validation error.
fn check(movement: &NewMovement) -> AppResult<()> {
    validate_delta(movement.delta)
        .map_err(|message| AppError::invalid_quantity("delta", message))?;
    check_movement(movement).map_err(|message| {
        match MovementOperation::for_delta(movement.delta) {
            Some(op) if op == movement.operation => AppError::validation("reason", message),
            _ => AppError::invalid_quantity("delta", message),
        }
    })
}

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Append one movement to the ledger and apply it to the stock cache
    pub async fn record(&self, actor_id: Uuid, input: RecordMovementInput) -> AppResult<Movement> {
        let movement = NewMovement {
            product_id: input.product_id,
            delta: input.delta,
            operation: input.operation,
            reason: input.reason,
            source: input.source,
            actor_id,
            occurred_at: input.occurred_at.unwrap_or_else(Utc::now),
        };
        check(&movement)?;

        let recorded = self.store.append_movement(movement).await?;
        tracing::debug!(
            movement_id = %recorded.id,
            product_id = %recorded.product_id,
            delta = %recorded.delta,
            reason = recorded.reason.as_str(),
            "Recorded movement"
        );
        Ok(recorded)
    }

    /// Consume stock for an order line
    pub async fn record_sale(
        &self,
        actor_id: Uuid,
        order_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
    ) -> AppResult<Movement> {
        self.record(
            actor_id,
            RecordMovementInput {
                product_id,
                delta: -quantity,
                operation: MovementOperation::Decrement,
                reason: MovementReason::SaleConsumption,
                source: MovementSource::Order(order_id),
                occurred_at: None,
            },
        )
        .await
    }

    /// Put stock back for a returned order line
    pub async fn record_sale_return(
        &self,
        actor_id: Uuid,
        order_return_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
    ) -> AppResult<Movement> {
        self.record(
            actor_id,
            RecordMovementInput {
                product_id,
                delta: quantity,
                operation: MovementOperation::Increment,
                reason: MovementReason::SaleReturn,
                source: MovementSource::OrderReturn(order_return_id),
                occurred_at: None,
            },
        )
        .await
    }

    /// Movements of one product with `from <= occurred_at < until`, ordered by
    /// occurrence then recording order. Either bound may be open.
    pub async fn movements_for(
        &self,
        product_id: Uuid,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<Movement>> {
        if self.store.get_product(product_id).await?.is_none() {
            return Err(AppError::UnknownProduct(product_id));
        }
        if let (Some(from), Some(until)) = (from, until) {
            if from > until {
                return Err(AppError::validation("from", "Range start must not be after its end"));
            }
        }

        let query = MovementQuery::for_product(product_id).between(from, until);
        self.store.movements(&query).await
    }

    /// Get a movement by ID
    pub async fn movement(&self, id: Uuid) -> AppResult<Movement> {
        self.store
            .movement(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Movement".to_string()))
    }
}
