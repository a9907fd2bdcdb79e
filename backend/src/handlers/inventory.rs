//! HTTP handlers for stock and ledger endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use shared::{day_end, day_start, Movement};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::Actor;
use crate::services::ledger::{LedgerService, RecordMovementInput};
use crate::services::stock::{LedgerCheck, StockService, StockStatus};
use crate::AppState;

/// Inclusive day range for movement listings; either end may be omitted
#[derive(Debug, Deserialize)]
pub struct MovementRangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// Get the cached quantity and stock level of a product
pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<StockStatus>> {
    let service = StockService::new(state.store);
    let status = service.stock_level(product_id).await?;
    Ok(Json(status))
}

/// List products that are low or out of stock
pub async fn get_low_stock(State(state): State<AppState>) -> AppResult<Json<Vec<StockStatus>>> {
    let service = StockService::new(state.store);
    let alerts = service.low_stock().await?;
    Ok(Json(alerts))
}

/// List the movements of a product
pub async fn list_movements(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<MovementRangeQuery>,
) -> AppResult<Json<Vec<Movement>>> {
    let service = LedgerService::new(state.store);
    let movements = service
        .movements_for(product_id, query.from.map(day_start), query.to.map(day_end))
        .await?;
    Ok(Json(movements))
}

/// Compare a product's cached quantity with its ledger sum
pub async fn verify_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<LedgerCheck>> {
    let service = StockService::new(state.store);
    let check = service.verify(product_id).await?;
    Ok(Json(check))
}

/// Record a movement (sale consumption, sale return, manual correction)
pub async fn record_movement(
    State(state): State<AppState>,
    Actor(actor_id): Actor,
    Json(input): Json<RecordMovementInput>,
) -> AppResult<(StatusCode, Json<Movement>)> {
    let service = LedgerService::new(state.store);
    let movement = service.record(actor_id, input).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}
