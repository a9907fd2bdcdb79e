//! Persistence boundary of the inventory ledger
//!
//! Services own the rules; a store owns atomicity. Every write method here is
//! one transaction: it either fully applies or leaves nothing behind. The
//! stock cache has no write method of its own, it only moves together with a
//! ledger append.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    ClosedDocument, DailyMovement, DocumentKind, DocumentStatus, InventoryItem, Movement,
    MovementTotals, NewMovement, Product, StockDocument,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Filter for ledger reads. `from` is inclusive, `until` exclusive.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery {
    pub product_ids: Option<Vec<Uuid>>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl MovementQuery {
    pub fn for_product(product_id: Uuid) -> Self {
        Self {
            product_ids: Some(vec![product_id]),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.until = until;
        self
    }

    pub fn matches(&self, movement: &Movement) -> bool {
        self.product_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&movement.product_id))
            && self.from.map_or(true, |from| movement.occurred_at >= from)
            && self.until.map_or(true, |until| movement.occurred_at < until)
    }
}

/// Everything needed to close a document in one unit of work
#[derive(Debug, Clone)]
pub struct CloseCommit {
    pub kind: DocumentKind,
    pub document_id: Uuid,
    /// Version the movements were derived from; a newer version means the
    /// document changed underneath the close
    pub expected_version: i64,
    pub movements: Vec<NewMovement>,
    pub total: Decimal,
    pub closed_at: DateTime<Utc>,
    pub closed_by: Uuid,
}

/// Read access to the product catalog
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_product(&self, id: Uuid) -> AppResult<Option<Product>>;

    /// All products, or only those with the given ids (missing ids are skipped)
    async fn list_products(&self, ids: Option<&[Uuid]>) -> AppResult<Vec<Product>>;
}

#[async_trait]
pub trait InventoryStore: ProductCatalog {
    /// Liveness check for health endpoints
    async fn ping(&self) -> AppResult<()>;

    // Ledger and stock cache

    /// Append one movement and apply its delta to the product's cached
    /// quantity. Fails with `UnknownProduct` before writing anything.
    async fn append_movement(&self, movement: NewMovement) -> AppResult<Movement>;

    /// Movements ordered by `occurred_at`, then recording sequence
    async fn movements(&self, query: &MovementQuery) -> AppResult<Vec<Movement>>;

    async fn movement(&self, id: Uuid) -> AppResult<Option<Movement>>;

    /// Per-product totals of the movements matching `query`. Products without
    /// matching movements are absent.
    async fn movement_totals(&self, query: &MovementQuery)
        -> AppResult<HashMap<Uuid, MovementTotals>>;

    async fn earliest_movement_at(&self) -> AppResult<Option<DateTime<Utc>>>;

    /// Cached quantity of a product, creating a zero record on first access
    async fn inventory_item(&self, product_id: Uuid) -> AppResult<InventoryItem>;

    async fn inventory_items(&self) -> AppResult<Vec<InventoryItem>>;

    // Documents

    async fn insert_document(&self, document: &StockDocument) -> AppResult<()>;

    async fn find_document(&self, kind: DocumentKind, id: Uuid)
        -> AppResult<Option<StockDocument>>;

    async fn list_documents(
        &self,
        kind: DocumentKind,
        status: Option<DocumentStatus>,
    ) -> AppResult<Vec<StockDocument>>;

    /// Replace header and lines of an open document. Fails with
    /// `DocumentClosed` if it was closed meanwhile and `ConcurrencyConflict`
    /// if its stored version is not `expected_version`.
    async fn save_open_document(
        &self,
        document: &StockDocument,
        expected_version: i64,
    ) -> AppResult<()>;

    async fn delete_open_document(&self, kind: DocumentKind, id: Uuid) -> AppResult<()>;

    /// Append the close movements, apply them to the cache and flip the
    /// document to closed, all or nothing.
    async fn commit_close(&self, commit: CloseCommit) -> AppResult<ClosedDocument>;

    // Daily aggregates

    async fn upsert_daily(&self, rows: &[DailyMovement]) -> AppResult<()>;

    async fn daily_rows(
        &self,
        product_ids: Option<&[Uuid]>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<DailyMovement>>;

    /// Last day known to be fully aggregated
    async fn aggregation_watermark(&self) -> AppResult<Option<NaiveDate>>;

    async fn set_aggregation_watermark(&self, day: NaiveDate) -> AppResult<()>;
}
