//! In-process store
//!
//! All state sits behind one async mutex, so every write is serialized and
//! observes a consistent snapshot. A close stages its movements and the cache
//! quantities they leave behind, and publishes them only once every movement
//! staged cleanly.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    ClosedDocument, DailyMovement, DocumentKind, DocumentStatus, InventoryItem, Movement,
    MovementTotals, NewMovement, Product, StockDocument,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CloseCommit, InventoryStore, MovementQuery, ProductCatalog};
use crate::error::{AppError, AppResult};

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    items: HashMap<Uuid, InventoryItem>,
    movements: Vec<Movement>,
    documents: HashMap<(DocumentKind, Uuid), StockDocument>,
    daily: BTreeMap<(Uuid, NaiveDate), DailyMovement>,
    watermark: Option<NaiveDate>,
}

impl MemoryState {
    /// Build the ledger row for `movement` and the cache quantity it leaves
    /// behind without applying either. `base` stands in for the cached
    /// quantity when earlier staged movements already touched the product.
    fn stage(
        &self,
        movement: NewMovement,
        sequence: i64,
        base: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> AppResult<(Movement, Decimal)> {
        let product = self
            .products
            .get(&movement.product_id)
            .ok_or(AppError::UnknownProduct(movement.product_id))?;
        let current = base
            .or_else(|| self.items.get(&movement.product_id).map(|item| item.quantity))
            .unwrap_or(Decimal::ZERO);
        let quantity = current
            .checked_add(movement.delta)
            .ok_or_else(|| AppError::invalid_quantity("delta", "Stock quantity is out of range"))?;

        let recorded = Movement {
            id: Uuid::new_v4(),
            sequence,
            product_id: movement.product_id,
            delta: movement.delta,
            operation: movement.operation,
            reason: movement.reason,
            source: movement.source,
            actor_id: movement.actor_id,
            unit_cost: product.cost,
            occurred_at: movement.occurred_at,
            recorded_at: now,
        };
        Ok((recorded, quantity))
    }

    /// Publish staged movements with the cache quantities they produced
    fn publish(
        &mut self,
        movements: &[Movement],
        quantities: HashMap<Uuid, Decimal>,
        now: DateTime<Utc>,
    ) {
        for (product_id, quantity) in quantities {
            self.items.insert(
                product_id,
                InventoryItem {
                    product_id,
                    quantity,
                    updated_at: now,
                },
            );
        }
        self.movements.extend_from_slice(movements);
    }

    fn append(&mut self, movement: NewMovement) -> AppResult<Movement> {
        let now = Utc::now();
        let sequence = self.movements.len() as i64 + 1;
        let product_id = movement.product_id;
        let (recorded, quantity) = self.stage(movement, sequence, None, now)?;
        self.publish(
            std::slice::from_ref(&recorded),
            HashMap::from([(product_id, quantity)]),
            now,
        );
        Ok(recorded)
    }

    fn open_document(
        &mut self,
        kind: DocumentKind,
        id: Uuid,
    ) -> AppResult<&mut StockDocument> {
        let document = self
            .documents
            .get_mut(&(kind, id))
            .ok_or_else(|| AppError::NotFound(kind.to_string()))?;
        match document.status {
            DocumentStatus::Open => Ok(document),
            DocumentStatus::Closed => Err(AppError::DocumentClosed { kind, id }),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let state = MemoryState {
            products: products.into_iter().map(|p| (p.id, p)).collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Add or replace a catalog entry
    pub async fn upsert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn get_product(&self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self, ids: Option<&[Uuid]>) -> AppResult<Vec<Product>> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| state.products.get(id).cloned())
                .collect(),
            None => state.products.values().cloned().collect(),
        };
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        products.dedup_by_key(|p| p.id);
        Ok(products)
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn append_movement(&self, movement: NewMovement) -> AppResult<Movement> {
        self.state.lock().await.append(movement)
    }

    async fn movements(&self, query: &MovementQuery) -> AppResult<Vec<Movement>> {
        let state = self.state.lock().await;
        let mut movements: Vec<Movement> = state
            .movements
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        movements.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(movements)
    }

    async fn movement(&self, id: Uuid) -> AppResult<Option<Movement>> {
        let state = self.state.lock().await;
        Ok(state.movements.iter().find(|m| m.id == id).cloned())
    }

    async fn movement_totals(
        &self,
        query: &MovementQuery,
    ) -> AppResult<HashMap<Uuid, MovementTotals>> {
        let state = self.state.lock().await;
        let mut totals: HashMap<Uuid, MovementTotals> = HashMap::new();
        for movement in state.movements.iter().filter(|m| query.matches(m)) {
            totals
                .entry(movement.product_id)
                .or_default()
                .add(movement.delta, movement.reason);
        }
        Ok(totals)
    }

    async fn earliest_movement_at(&self) -> AppResult<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state.movements.iter().map(|m| m.occurred_at).min())
    }

    async fn inventory_item(&self, product_id: Uuid) -> AppResult<InventoryItem> {
        let mut state = self.state.lock().await;
        if !state.products.contains_key(&product_id) {
            return Err(AppError::UnknownProduct(product_id));
        }
        let item = state
            .items
            .entry(product_id)
            .or_insert_with(|| InventoryItem {
                product_id,
                quantity: Decimal::ZERO,
                updated_at: Utc::now(),
            });
        Ok(item.clone())
    }

    async fn inventory_items(&self) -> AppResult<Vec<InventoryItem>> {
        let state = self.state.lock().await;
        let mut items: Vec<InventoryItem> = state.items.values().cloned().collect();
        items.sort_by_key(|item| item.product_id);
        Ok(items)
    }

    async fn insert_document(&self, document: &StockDocument) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state
            .documents
            .insert((document.kind, document.id), document.clone());
        Ok(())
    }

    async fn find_document(
        &self,
        kind: DocumentKind,
        id: Uuid,
    ) -> AppResult<Option<StockDocument>> {
        let state = self.state.lock().await;
        Ok(state.documents.get(&(kind, id)).cloned())
    }

    async fn list_documents(
        &self,
        kind: DocumentKind,
        status: Option<DocumentStatus>,
    ) -> AppResult<Vec<StockDocument>> {
        let state = self.state.lock().await;
        let mut documents: Vec<StockDocument> = state
            .documents
            .values()
            .filter(|d| d.kind == kind && status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(documents)
    }

    async fn save_open_document(
        &self,
        document: &StockDocument,
        expected_version: i64,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let stored = state.open_document(document.kind, document.id)?;
        if stored.version != expected_version {
            return Err(AppError::ConcurrencyConflict(format!(
                "{} {} was modified concurrently",
                document.kind, document.id
            )));
        }
        *stored = document.clone();
        Ok(())
    }

    async fn delete_open_document(&self, kind: DocumentKind, id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.open_document(kind, id)?;
        state.documents.remove(&(kind, id));
        Ok(())
    }

    async fn commit_close(&self, commit: CloseCommit) -> AppResult<ClosedDocument> {
        let mut state = self.state.lock().await;
        let key = (commit.kind, commit.document_id);

        let current = state
            .documents
            .get(&key)
            .ok_or_else(|| AppError::NotFound(commit.kind.to_string()))?;
        match current.status {
            DocumentStatus::Closed => {
                return Err(AppError::AlreadyClosed {
                    kind: commit.kind,
                    id: commit.document_id,
                })
            }
            DocumentStatus::Open if current.version != commit.expected_version => {
                return Err(AppError::ConcurrencyConflict(format!(
                    "{} {} changed while closing",
                    commit.kind, commit.document_id
                )))
            }
            DocumentStatus::Open => {}
        }

        let now = Utc::now();
        let mut quantities: HashMap<Uuid, Decimal> = HashMap::new();
        let mut movements = Vec::with_capacity(commit.movements.len());
        for movement in commit.movements {
            let sequence = (state.movements.len() + movements.len()) as i64 + 1;
            let product_id = movement.product_id;
            let base = quantities.get(&product_id).copied();
            let (recorded, quantity) = state.stage(movement, sequence, base, now)?;
            quantities.insert(product_id, quantity);
            movements.push(recorded);
        }

        let document = state
            .documents
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(commit.kind.to_string()))?;
        document.status = DocumentStatus::Closed;
        document.closed_at = Some(commit.closed_at);
        document.closed_by = Some(commit.closed_by);
        document.total = commit.total;
        document.updated_at = commit.closed_at;
        document.version += 1;
        let document = document.clone();
        state.publish(&movements, quantities, now);

        Ok(ClosedDocument {
            document,
            movements,
        })
    }

    async fn upsert_daily(&self, rows: &[DailyMovement]) -> AppResult<()> {
        let mut state = self.state.lock().await;
        for row in rows {
            state.daily.insert((row.product_id, row.date), row.clone());
        }
        Ok(())
    }

    async fn daily_rows(
        &self,
        product_ids: Option<&[Uuid]>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<DailyMovement>> {
        let state = self.state.lock().await;
        let mut rows: Vec<DailyMovement> = state
            .daily
            .values()
            .filter(|row| {
                row.date >= from
                    && row.date <= to
                    && product_ids.map_or(true, |ids| ids.contains(&row.product_id))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then(a.product_id.cmp(&b.product_id)));
        Ok(rows)
    }

    async fn aggregation_watermark(&self) -> AppResult<Option<NaiveDate>> {
        Ok(self.state.lock().await.watermark)
    }

    async fn set_aggregation_watermark(&self, day: NaiveDate) -> AppResult<()> {
        self.state.lock().await.watermark = Some(day);
        Ok(())
    }
}
