//! Stock reconciliation reports
//!
//! Ideal remaining stock is what the range's purchases and consumption imply;
//! actual remaining is the stock cache wound back to the end of the range.
//! Totals come from daily aggregates up to the aggregation watermark and from
//! the live ledger after it, or from the ledger alone.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    day_end, day_start, reconcile, validate_date_range, DateRange, MovementTotals, Product,
    ReconciliationReport, ReconciliationRow, TotalsSource,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{InventoryStore, MovementQuery};

fn out_of_range(product_id: Uuid) -> AppError {
    AppError::Internal(format!("Reconciliation figures overflowed for product {}", product_id))
}

#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn InventoryStore>,
    use_daily_aggregates: bool,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn InventoryStore>, use_daily_aggregates: bool) -> Self {
        Self {
            store,
            use_daily_aggregates,
        }
    }

    /// Build the report for `range`, for the given products or for every
    /// stocked product.
    pub async fn report(
        &self,
        range: DateRange,
        product_ids: Option<Vec<Uuid>>,
    ) -> AppResult<ReconciliationReport> {
        validate_date_range(&range).map_err(|msg| AppError::validation("from", msg))?;

        let cached: HashMap<Uuid, Decimal> = self
            .store
            .inventory_items()
            .await?
            .into_iter()
            .map(|item| (item.product_id, item.quantity))
            .collect();
        let products = self.products(product_ids, &cached).await?;
        let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();

        let mut source = TotalsSource::Ledger;
        let mut in_range = HashMap::new();
        let mut after = HashMap::new();
        if !ids.is_empty() {
            let (totals, from_aggregates) =
                self.period_totals(&ids, range.from, Some(range.to)).await?;
            in_range = totals;
            if from_aggregates {
                source = TotalsSource::DailyAggregates;
            }
            if let Some(next_day) = range.to.succ_opt() {
                after = self.period_totals(&ids, next_day, None).await?.0;
            }
        }

        let empty = MovementTotals::default();
        let rows: Vec<ReconciliationRow> = products
            .iter()
            .map(|product| {
                let quantity = cached.get(&product.id).copied().unwrap_or(Decimal::ZERO);
                let since = after.get(&product.id).map_or(Decimal::ZERO, |t| t.net_delta);
                let totals = in_range.get(&product.id).unwrap_or(&empty);
                quantity
                    .checked_sub(since)
                    .and_then(|actual| reconcile(product, totals, actual))
                    .ok_or_else(|| out_of_range(product.id))
            })
            .collect::<AppResult<_>>()?;
        let total_deviation_value = rows
            .iter()
            .try_fold(Decimal::ZERO, |sum, row| sum.checked_add(row.deviation_value))
            .ok_or_else(|| AppError::Internal("Total deviation value overflowed".to_string()))?;

        tracing::info!(
            from = %range.from,
            to = %range.to,
            products = rows.len(),
            source = ?source,
            "Built reconciliation report"
        );

        Ok(ReconciliationReport {
            range,
            generated_at: Utc::now(),
            source,
            rows,
            total_deviation_value,
        })
    }

    /// Export report rows to CSV
    pub fn export_to_csv(report: &ReconciliationReport) -> AppResult<String> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for row in &report.rows {
            wtr.serialize(row)
                .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
    }

    /// Products covered by the report, ordered by name. A filter naming an
    /// unknown product fails the whole report.
    async fn products(
        &self,
        filter: Option<Vec<Uuid>>,
        cached: &HashMap<Uuid, Decimal>,
    ) -> AppResult<Vec<Product>> {
        match filter {
            Some(ids) => {
                let products = self.store.list_products(Some(&ids)).await?;
                if let Some(missing) = ids.iter().find(|id| !products.iter().any(|p| p.id == **id))
                {
                    return Err(AppError::UnknownProduct(*missing));
                }
                Ok(products)
            }
            None => {
                let stocked: Vec<Uuid> = cached.keys().copied().collect();
                if stocked.is_empty() {
                    return Ok(Vec::new());
                }
                self.store.list_products(Some(&stocked)).await
            }
        }
    }

    /// Per-product totals for days `from..=to` (`to = None` means open
    /// ended). The flag tells whether any daily aggregate was used.
    async fn period_totals(
        &self,
        ids: &[Uuid],
        from: NaiveDate,
        to: Option<NaiveDate>,
    ) -> AppResult<(HashMap<Uuid, MovementTotals>, bool)> {
        let mut totals: HashMap<Uuid, MovementTotals> = HashMap::new();
        let mut ledger_from = from;
        let mut from_aggregates = false;

        if self.use_daily_aggregates {
            if let Some(watermark) = self.store.aggregation_watermark().await? {
                if from <= watermark {
                    let through = to.map_or(watermark, |to| to.min(watermark));
                    for row in self.store.daily_rows(Some(ids), from, through).await? {
                        totals.entry(row.product_id).or_default().merge(&row.totals);
                    }
                    from_aggregates = true;

                    match through.succ_opt() {
                        Some(next) => ledger_from = next,
                        None => return Ok((totals, from_aggregates)),
                    }
                }
            }
        }

        if to.map_or(true, |to| ledger_from <= to) {
            let query = MovementQuery {
                product_ids: Some(ids.to_vec()),
                from: Some(day_start(ledger_from)),
                until: to.map(day_end),
            };
            for (product_id, tail) in self.store.movement_totals(&query).await? {
                totals.entry(product_id).or_default().merge(&tail);
            }
        }

        Ok((totals, from_aggregates))
    }
}
