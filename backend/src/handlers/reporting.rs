//! Reporting handlers for reconciliation and aggregation

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use shared::DateRange;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::Actor;
use crate::services::aggregation::{AggregationSummary, DailyAggregator};
use crate::services::reconciliation::ReconciliationService;
use crate::AppState;

#[derive(Deserialize)]
pub struct ReconciliationQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Comma-separated product ids
    pub product_ids: Option<String>,
    pub format: Option<String>, // "json" or "csv"
}

#[derive(Deserialize)]
pub struct AggregationRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

fn parse_product_ids(raw: Option<&str>) -> AppResult<Option<Vec<Uuid>>> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(|id| {
            Uuid::parse_str(id.trim())
                .map_err(|_| AppError::validation("product_ids", "Product ids must be UUIDs"))
        })
        .collect::<AppResult<Vec<_>>>()
        .map(Some)
}

/// Get the stock reconciliation report
pub async fn get_reconciliation_report(
    State(state): State<AppState>,
    Query(query): Query<ReconciliationQuery>,
) -> AppResult<impl IntoResponse> {
    let product_ids = parse_product_ids(query.product_ids.as_deref())?;
    let service =
        ReconciliationService::new(state.store, state.config.reconcile_from_aggregates());

    let report = service
        .report(DateRange::new(query.from, query.to), product_ids)
        .await?;

    if query.format.as_deref() == Some("csv") {
        let csv = ReconciliationService::export_to_csv(&report)?;
        Ok((
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"reconciliation.csv\"",
                ),
            ],
            csv,
        )
            .into_response())
    } else {
        Ok(Json(report).into_response())
    }
}

/// Re-aggregate daily movement rows for a range of days
pub async fn run_daily_aggregation(
    State(state): State<AppState>,
    _actor: Actor,
    Json(request): Json<AggregationRequest>,
) -> AppResult<Json<AggregationSummary>> {
    let aggregation = &state.config.aggregation;
    let aggregator = DailyAggregator::new(state.store.clone(), aggregation.lookback_days)
        .with_max_days(aggregation.max_days);
    let summary = aggregator.aggregate_range(request.from, request.to).await?;
    Ok(Json(summary))
}
