//! Daily aggregation of the movement ledger
//!
//! Rows are recomputed from the ledger and upserted, so any day can be
//! aggregated again at any time. The watermark records the last day known to
//! be aggregated; reconciliation only trusts daily rows up to it. A single
//! run covers at most `max_days` days; a scheduled run that is further behind
//! catches up over the following ticks.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{day_end, day_start, validate_date_range, DailyMovement, DateRange};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{InventoryStore, MovementQuery};

/// Default cap on the days covered by one aggregation run
pub const DEFAULT_MAX_DAYS: u32 = 366;

#[derive(Clone)]
pub struct DailyAggregator {
    store: Arc<dyn InventoryStore>,
    lookback_days: u32,
    max_days: u32,
}

/// Outcome of aggregating a range of days
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub days: u32,
    pub rows: usize,
    pub aggregated_at: DateTime<Utc>,
}

impl DailyAggregator {
    pub fn new(store: Arc<dyn InventoryStore>, lookback_days: u32) -> Self {
        Self {
            store,
            lookback_days,
            max_days: DEFAULT_MAX_DAYS,
        }
    }

    /// Cap the number of days one run may cover (at least one)
    pub fn with_max_days(mut self, max_days: u32) -> Self {
        self.max_days = max_days.max(1);
        self
    }

    /// Recompute and upsert the rows of one day. Returns the number of
    /// products that moved that day.
    pub async fn aggregate_day(&self, day: NaiveDate) -> AppResult<usize> {
        let within = MovementQuery::default().between(Some(day_start(day)), Some(day_end(day)));
        let totals = self.store.movement_totals(&within).await?;
        if totals.is_empty() {
            return Ok(0);
        }

        // Closing quantity = cache minus everything after the day
        let after = MovementQuery::default().between(Some(day_end(day)), None);
        let later = self.store.movement_totals(&after).await?;
        let cached: HashMap<Uuid, Decimal> = self
            .store
            .inventory_items()
            .await?
            .into_iter()
            .map(|item| (item.product_id, item.quantity))
            .collect();

        let aggregated_at = Utc::now();
        let rows: Vec<DailyMovement> = totals
            .into_iter()
            .map(|(product_id, totals)| {
                let quantity = cached.get(&product_id).copied().unwrap_or(Decimal::ZERO);
                let since = later
                    .get(&product_id)
                    .map(|t| t.net_delta)
                    .unwrap_or(Decimal::ZERO);
                DailyMovement {
                    product_id,
                    date: day,
                    totals,
                    closing_quantity: quantity - since,
                    aggregated_at,
                }
            })
            .collect();

        self.store.upsert_daily(&rows).await?;
        Ok(rows.len())
    }

    /// Aggregate every day of `[from, to]`. Ranges longer than `max_days`
    /// are rejected.
    pub async fn aggregate_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<AggregationSummary> {
        let range = DateRange::new(from, to);
        validate_date_range(&range).map_err(|msg| AppError::validation("from", msg))?;
        if (to - from).num_days() >= i64::from(self.max_days) {
            return Err(AppError::Validation {
                field: "to".to_string(),
                message: format!("At most {} days can be aggregated at once", self.max_days),
            });
        }

        let mut days = 0;
        let mut rows = 0;
        for day in range.days() {
            rows += self.aggregate_day(day).await?;
            days += 1;
        }

        Ok(AggregationSummary {
            from,
            to,
            days,
            rows,
            aggregated_at: Utc::now(),
        })
    }

    /// One scheduled run: aggregate everything after the watermark plus the
    /// lookback window through yesterday, then advance the watermark to the
    /// last day covered. A run spans at most `max_days` days and always
    /// includes the first day not yet aggregated. Returns `None` when there
    /// is nothing to do.
    pub async fn run_once(&self, today: NaiveDate) -> AppResult<Option<AggregationSummary>> {
        let Some(yesterday) = today.pred_opt() else {
            return Ok(None);
        };

        let watermark = self.store.aggregation_watermark().await?;
        // `next` is the first day never aggregated; `start` also reaches back
        // over the lookback window
        let (next, start) = match watermark {
            Some(watermark) => {
                let next = watermark.succ_opt().unwrap_or(watermark);
                let window_start = today
                    .checked_sub_signed(Duration::days(i64::from(self.lookback_days)))
                    .unwrap_or(NaiveDate::MIN);
                (next, next.min(window_start))
            }
            None => {
                let next = match self.store.earliest_movement_at().await? {
                    Some(earliest) => earliest.date_naive(),
                    None => yesterday,
                };
                (next, next)
            }
        };

        let span = Duration::days(i64::from(self.max_days) - 1);
        let end = next
            .checked_add_signed(span)
            .map_or(yesterday, |last| last.min(yesterday));
        let start = end
            .checked_sub_signed(span)
            .map_or(start, |first| start.max(first));
        if start > end {
            return Ok(None);
        }

        let summary = self.aggregate_range(start, end).await?;
        let watermark = match watermark {
            Some(current) if current > end => current,
            _ => end,
        };
        self.store.set_aggregation_watermark(watermark).await?;
        Ok(Some(summary))
    }

    /// Run the aggregator every `interval` until the runtime shuts down.
    /// A failed run is logged and retried on the next tick.
    pub fn spawn(self, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                lookback_days = self.lookback_days,
                "Starting daily aggregator"
            );
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                match self.run_once(Utc::now().date_naive()).await {
                    Ok(Some(summary)) => tracing::info!(
                        from = %summary.from,
                        to = %summary.to,
                        days = summary.days,
                        rows = summary.rows,
                        "Daily aggregation finished"
                    ),
                    Ok(None) => tracing::debug!("Daily aggregation up to date"),
                    Err(err) => tracing::warn!(error = %err, "Daily aggregation failed"),
                }
            }
        })
    }
}
