//! PostgreSQL store
//!
//! Locking model:
//! - a document row is taken with `FOR UPDATE NOWAIT` before any edit or
//!   close, so a second writer fails fast with `ConcurrencyConflict` instead
//!   of queueing behind the first;
//! - cached quantities move with an atomic upsert-increment, which serializes
//!   concurrent closes touching the same product on the `inventory_items` row;
//! - ledger rows are plain inserts and need no lock.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    ClosedDocument, DailyMovement, DocumentKind, DocumentLine, DocumentStatus, InventoryItem,
    Movement, MovementSource, MovementTotals, NewMovement, Product, StockDocument,
};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use super::{CloseCommit, InventoryStore, MovementQuery, ProductCatalog};
use crate::error::{AppError, AppResult};

/// SQLSTATEs that mean "another transaction got there first"
const CONFLICT_STATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

/// Header and items tables of a document kind
fn tables(kind: DocumentKind) -> (&'static str, &'static str) {
    match kind {
        DocumentKind::PurchaseInvoice => ("purchase_invoices", "purchase_invoice_items"),
        DocumentKind::ReturnPurchaseInvoice => {
            ("return_purchase_invoices", "return_purchase_invoice_items")
        }
        DocumentKind::Waste => ("wastes", "waste_items"),
        DocumentKind::Stocktaking => ("stocktakings", "stocktaking_items"),
    }
}

/// Map driver errors, turning lock and serialization failures into conflicts
fn db_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if CONFLICT_STATES.iter().any(|state| *state == code) {
                return AppError::ConcurrencyConflict(db_err.message().to_string());
            }
        }
    }
    AppError::DatabaseError(err)
}

fn corrupt(err: shared::ParseTagError) -> AppError {
    AppError::Internal(format!("Corrupt stored value: {}", err))
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    unit: String,
    cost: Decimal,
    min_stock: Decimal,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            unit: row.unit,
            cost: row.cost,
            min_stock: row.min_stock,
        }
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    product_id: Uuid,
    quantity: Decimal,
    updated_at: DateTime<Utc>,
}

impl From<ItemRow> for InventoryItem {
    fn from(row: ItemRow) -> Self {
        InventoryItem {
            product_id: row.product_id,
            quantity: row.quantity,
            updated_at: row.updated_at,
        }
    }
}

const MOVEMENT_COLUMNS: &str = "id, sequence, product_id, delta, operation, reason, \
     source_type, source_id, actor_id, unit_cost, occurred_at, recorded_at";

#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    sequence: i64,
    product_id: Uuid,
    delta: Decimal,
    operation: String,
    reason: String,
    source_type: String,
    source_id: Uuid,
    actor_id: Uuid,
    unit_cost: Decimal,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for Movement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> AppResult<Self> {
        Ok(Movement {
            id: row.id,
            sequence: row.sequence,
            product_id: row.product_id,
            delta: row.delta,
            operation: row.operation.parse().map_err(corrupt)?,
            reason: row.reason.parse().map_err(corrupt)?,
            source: MovementSource::from_parts(&row.source_type, row.source_id)
                .map_err(corrupt)?,
            actor_id: row.actor_id,
            unit_cost: row.unit_cost,
            occurred_at: row.occurred_at,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TotalsRow {
    product_id: Uuid,
    increments: Decimal,
    decrements: Decimal,
    net_delta: Decimal,
    purchased: Decimal,
    purchase_returned: Decimal,
    wasted: Decimal,
    sold: Decimal,
    sale_returned: Decimal,
    stocktaking_adjusted: Decimal,
    movement_count: i64,
}

impl From<TotalsRow> for MovementTotals {
    fn from(row: TotalsRow) -> Self {
        MovementTotals {
            increments: row.increments,
            decrements: row.decrements,
            net_delta: row.net_delta,
            purchased: row.purchased,
            purchase_returned: row.purchase_returned,
            wasted: row.wasted,
            sold: row.sold,
            sale_returned: row.sale_returned,
            stocktaking_adjusted: row.stocktaking_adjusted,
            movement_count: row.movement_count,
        }
    }
}

const DOCUMENT_COLUMNS: &str = "id, status, counterparty_id, notes, total, version, \
     created_by, created_at, updated_at, closed_at, closed_by";

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: Uuid,
    status: String,
    counterparty_id: Option<Uuid>,
    notes: Option<String>,
    total: Decimal,
    version: i64,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<Uuid>,
}

#[derive(Debug, FromRow)]
struct LineRow {
    id: Uuid,
    document_id: Uuid,
    position: i32,
    product_id: Uuid,
    quantity: Decimal,
    unit_price: Decimal,
    total: Decimal,
    stock_quantity: Option<Decimal>,
}

impl From<LineRow> for DocumentLine {
    fn from(row: LineRow) -> Self {
        DocumentLine {
            id: row.id,
            position: row.position,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            total: row.total,
            stock_quantity: row.stock_quantity,
        }
    }
}

fn assemble(
    kind: DocumentKind,
    row: DocumentRow,
    lines: Vec<DocumentLine>,
) -> AppResult<StockDocument> {
    Ok(StockDocument {
        id: row.id,
        kind,
        status: row.status.parse().map_err(corrupt)?,
        counterparty_id: row.counterparty_id,
        notes: row.notes,
        total: row.total,
        version: row.version,
        created_by: row.created_by,
        created_at: row.created_at,
        updated_at: row.updated_at,
        closed_at: row.closed_at,
        closed_by: row.closed_by,
        lines,
    })
}

#[derive(Debug, FromRow)]
struct DailyRow {
    product_id: Uuid,
    date: NaiveDate,
    increments: Decimal,
    decrements: Decimal,
    net_delta: Decimal,
    purchased: Decimal,
    purchase_returned: Decimal,
    wasted: Decimal,
    sold: Decimal,
    sale_returned: Decimal,
    stocktaking_adjusted: Decimal,
    movement_count: i64,
    closing_quantity: Decimal,
    aggregated_at: DateTime<Utc>,
}

impl From<DailyRow> for DailyMovement {
    fn from(row: DailyRow) -> Self {
        DailyMovement {
            product_id: row.product_id,
            date: row.date,
            totals: MovementTotals {
                increments: row.increments,
                decrements: row.decrements,
                net_delta: row.net_delta,
                purchased: row.purchased,
                purchase_returned: row.purchase_returned,
                wasted: row.wasted,
                sold: row.sold,
                sale_returned: row.sale_returned,
                stocktaking_adjusted: row.stocktaking_adjusted,
                movement_count: row.movement_count,
            },
            closing_quantity: row.closing_quantity,
            aggregated_at: row.aggregated_at,
        }
    }
}

impl PgStore {
    /// Create a new PgStore instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Append a movement inside an open transaction
    async fn insert_movement(conn: &mut PgConnection, movement: &NewMovement) -> AppResult<Movement> {
        let unit_cost = sqlx::query_scalar::<_, Decimal>("SELECT cost FROM products WHERE id = $1")
            .bind(movement.product_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?
            .ok_or(AppError::UnknownProduct(movement.product_id))?;

        sqlx::query(
            r#"
            INSERT INTO inventory_items (product_id, quantity, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (product_id)
            DO UPDATE SET quantity = inventory_items.quantity + EXCLUDED.quantity,
                          updated_at = NOW()
            "#,
        )
        .bind(movement.product_id)
        .bind(movement.delta)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;

        let sql = format!(
            r#"
            INSERT INTO inventory_item_movements (
                id, product_id, delta, operation, reason, source_type, source_id,
                actor_id, unit_cost, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            MOVEMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(movement.product_id)
            .bind(movement.delta)
            .bind(movement.operation.as_str())
            .bind(movement.reason.as_str())
            .bind(movement.source.type_str())
            .bind(movement.source.id())
            .bind(movement.actor_id)
            .bind(unit_cost)
            .bind(movement.occurred_at)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_error)?;

        row.try_into()
    }

    /// Lock a document header row, failing fast if another writer holds it
    async fn lock_document(
        conn: &mut PgConnection,
        kind: DocumentKind,
        id: Uuid,
    ) -> AppResult<(DocumentStatus, i64)> {
        let (header, _) = tables(kind);
        let sql = format!("SELECT status, version FROM {} WHERE id = $1 FOR UPDATE NOWAIT", header);
        let (status, version) = sqlx::query_as::<_, (String, i64)>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?
            .ok_or_else(|| AppError::NotFound(kind.to_string()))?;

        Ok((status.parse().map_err(corrupt)?, version))
    }

    async fn insert_lines(
        conn: &mut PgConnection,
        kind: DocumentKind,
        document_id: Uuid,
        lines: &[DocumentLine],
    ) -> AppResult<()> {
        let (_, items) = tables(kind);
        for line in lines {
            let sql = if kind.has_stock_snapshot() {
                format!(
                    "INSERT INTO {} (id, document_id, position, product_id, quantity, unit_price, total, stock_quantity) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                    items
                )
            } else {
                format!(
                    "INSERT INTO {} (id, document_id, position, product_id, quantity, unit_price, total) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    items
                )
            };
            let mut query = sqlx::query(&sql)
                .bind(line.id)
                .bind(document_id)
                .bind(line.position)
                .bind(line.product_id)
                .bind(line.quantity)
                .bind(line.unit_price)
                .bind(line.total);
            if kind.has_stock_snapshot() {
                query = query.bind(line.stock_quantity.unwrap_or(Decimal::ZERO));
            }
            query.execute(&mut *conn).await.map_err(db_error)?;
        }
        Ok(())
    }

    async fn load_lines(
        conn: &mut PgConnection,
        kind: DocumentKind,
        document_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, Vec<DocumentLine>>> {
        let (_, items) = tables(kind);
        let snapshot = if kind.has_stock_snapshot() {
            "stock_quantity"
        } else {
            "NULL::numeric AS stock_quantity"
        };
        let sql = format!(
            "SELECT id, document_id, position, product_id, quantity, unit_price, total, {} \
             FROM {} WHERE document_id = ANY($1) ORDER BY document_id, position",
            snapshot, items
        );
        let rows = sqlx::query_as::<_, LineRow>(&sql)
            .bind(document_ids.to_vec())
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;

        let mut lines: HashMap<Uuid, Vec<DocumentLine>> = HashMap::new();
        for row in rows {
            lines.entry(row.document_id).or_default().push(row.into());
        }
        Ok(lines)
    }

    async fn load_document(
        conn: &mut PgConnection,
        kind: DocumentKind,
        id: Uuid,
    ) -> AppResult<Option<StockDocument>> {
        let (header, _) = tables(kind);
        let sql = format!("SELECT {} FROM {} WHERE id = $1", DOCUMENT_COLUMNS, header);
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => {
                let mut lines = Self::load_lines(conn, kind, &[id]).await?;
                let lines = lines.remove(&id).unwrap_or_default();
                assemble(kind, row, lines).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProductCatalog for PgStore {
    async fn get_product(&self, id: Uuid) -> AppResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, unit, cost, min_stock FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Product::from))
    }

    async fn list_products(&self, ids: Option<&[Uuid]>) -> AppResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, name, unit, cost, min_stock
            FROM products
            WHERE ($1::uuid[] IS NULL OR id = ANY($1))
            ORDER BY name, id
            "#,
        )
        .bind(ids.map(|ids| ids.to_vec()))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    async fn append_movement(&self, movement: NewMovement) -> AppResult<Movement> {
        let mut tx = self.db.begin().await?;
        let recorded = Self::insert_movement(&mut tx, &movement).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(recorded)
    }

    async fn movements(&self, query: &MovementQuery) -> AppResult<Vec<Movement>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM inventory_item_movements
            WHERE ($1::uuid[] IS NULL OR product_id = ANY($1))
              AND ($2::timestamptz IS NULL OR occurred_at >= $2)
              AND ($3::timestamptz IS NULL OR occurred_at < $3)
            ORDER BY occurred_at, sequence
            "#,
            MOVEMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(query.product_ids.clone())
            .bind(query.from)
            .bind(query.until)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(Movement::try_from).collect()
    }

    async fn movement(&self, id: Uuid) -> AppResult<Option<Movement>> {
        let sql = format!(
            "SELECT {} FROM inventory_item_movements WHERE id = $1",
            MOVEMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(Movement::try_from).transpose()
    }

    async fn movement_totals(
        &self,
        query: &MovementQuery,
    ) -> AppResult<HashMap<Uuid, MovementTotals>> {
        let rows = sqlx::query_as::<_, TotalsRow>(
            r#"
            SELECT product_id,
                   COALESCE(SUM(CASE WHEN delta > 0 THEN delta ELSE 0 END), 0) AS increments,
                   COALESCE(SUM(CASE WHEN delta < 0 THEN -delta ELSE 0 END), 0) AS decrements,
                   COALESCE(SUM(delta), 0) AS net_delta,
                   COALESCE(SUM(CASE WHEN reason = 'purchase' THEN delta ELSE 0 END), 0) AS purchased,
                   COALESCE(SUM(CASE WHEN reason = 'purchase_return' THEN -delta ELSE 0 END), 0) AS purchase_returned,
                   COALESCE(SUM(CASE WHEN reason = 'waste' THEN -delta ELSE 0 END), 0) AS wasted,
                   COALESCE(SUM(CASE WHEN reason = 'sale_consumption' THEN -delta ELSE 0 END), 0) AS sold,
                   COALESCE(SUM(CASE WHEN reason = 'sale_return' THEN delta ELSE 0 END), 0) AS sale_returned,
                   COALESCE(SUM(CASE WHEN reason = 'stocktaking_adjustment' THEN delta ELSE 0 END), 0) AS stocktaking_adjusted,
                   COUNT(*) AS movement_count
            FROM inventory_item_movements
            WHERE ($1::uuid[] IS NULL OR product_id = ANY($1))
              AND ($2::timestamptz IS NULL OR occurred_at >= $2)
              AND ($3::timestamptz IS NULL OR occurred_at < $3)
            GROUP BY product_id
            "#,
        )
        .bind(query.product_ids.clone())
        .bind(query.from)
        .bind(query.until)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.product_id, MovementTotals::from(row)))
            .collect())
    }

    async fn earliest_movement_at(&self) -> AppResult<Option<DateTime<Utc>>> {
        let earliest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MIN(occurred_at) FROM inventory_item_movements",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(earliest)
    }

    async fn inventory_item(&self, product_id: Uuid) -> AppResult<InventoryItem> {
        sqlx::query(
            r#"
            INSERT INTO inventory_items (product_id, quantity, updated_at)
            SELECT id, 0, NOW() FROM products WHERE id = $1
            ON CONFLICT (product_id) DO NOTHING
            "#,
        )
        .bind(product_id)
        .execute(&self.db)
        .await?;

        let row = sqlx::query_as::<_, ItemRow>(
            "SELECT product_id, quantity, updated_at FROM inventory_items WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::UnknownProduct(product_id))?;

        Ok(row.into())
    }

    async fn inventory_items(&self) -> AppResult<Vec<InventoryItem>> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT product_id, quantity, updated_at FROM inventory_items ORDER BY product_id",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(InventoryItem::from).collect())
    }

    async fn insert_document(&self, document: &StockDocument) -> AppResult<()> {
        let (header, _) = tables(document.kind);
        let mut tx = self.db.begin().await?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            header, DOCUMENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(document.id)
            .bind(document.status.as_str())
            .bind(document.counterparty_id)
            .bind(&document.notes)
            .bind(document.total)
            .bind(document.version)
            .bind(document.created_by)
            .bind(document.created_at)
            .bind(document.updated_at)
            .bind(document.closed_at)
            .bind(document.closed_by)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        Self::insert_lines(&mut tx, document.kind, document.id, &document.lines).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn find_document(
        &self,
        kind: DocumentKind,
        id: Uuid,
    ) -> AppResult<Option<StockDocument>> {
        let mut conn = self.db.acquire().await?;
        Self::load_document(&mut conn, kind, id).await
    }

    async fn list_documents(
        &self,
        kind: DocumentKind,
        status: Option<DocumentStatus>,
    ) -> AppResult<Vec<StockDocument>> {
        let (header, _) = tables(kind);
        let mut conn = self.db.acquire().await?;

        let sql = format!(
            "SELECT {} FROM {} WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC",
            DOCUMENT_COLUMNS, header
        );
        let rows = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&mut *conn)
            .await?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut lines = Self::load_lines(&mut conn, kind, &ids).await?;

        rows.into_iter()
            .map(|row| {
                let document_lines = lines.remove(&row.id).unwrap_or_default();
                assemble(kind, row, document_lines)
            })
            .collect()
    }

    async fn save_open_document(
        &self,
        document: &StockDocument,
        expected_version: i64,
    ) -> AppResult<()> {
        let (header, items) = tables(document.kind);
        let mut tx = self.db.begin().await?;

        match Self::lock_document(&mut tx, document.kind, document.id).await? {
            (DocumentStatus::Closed, _) => {
                return Err(AppError::DocumentClosed {
                    kind: document.kind,
                    id: document.id,
                })
            }
            (DocumentStatus::Open, version) if version != expected_version => {
                return Err(AppError::ConcurrencyConflict(format!(
                    "{} {} was modified concurrently",
                    document.kind, document.id
                )))
            }
            (DocumentStatus::Open, _) => {}
        }

        let sql = format!(
            "UPDATE {} SET counterparty_id = $2, notes = $3, total = $4, version = $5, updated_at = $6 \
             WHERE id = $1",
            header
        );
        sqlx::query(&sql)
            .bind(document.id)
            .bind(document.counterparty_id)
            .bind(&document.notes)
            .bind(document.total)
            .bind(document.version)
            .bind(document.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let sql = format!("DELETE FROM {} WHERE document_id = $1", items);
        sqlx::query(&sql)
            .bind(document.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        Self::insert_lines(&mut tx, document.kind, document.id, &document.lines).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn delete_open_document(&self, kind: DocumentKind, id: Uuid) -> AppResult<()> {
        let (header, items) = tables(kind);
        let mut tx = self.db.begin().await?;

        if let (DocumentStatus::Closed, _) = Self::lock_document(&mut tx, kind, id).await? {
            return Err(AppError::DocumentClosed { kind, id });
        }

        let sql = format!("DELETE FROM {} WHERE document_id = $1", items);
        sqlx::query(&sql)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        let sql = format!("DELETE FROM {} WHERE id = $1", header);
        sqlx::query(&sql)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn commit_close(&self, commit: CloseCommit) -> AppResult<ClosedDocument> {
        let (header, _) = tables(commit.kind);
        let mut tx = self.db.begin().await?;

        match Self::lock_document(&mut tx, commit.kind, commit.document_id).await? {
            (DocumentStatus::Closed, _) => {
                return Err(AppError::AlreadyClosed {
                    kind: commit.kind,
                    id: commit.document_id,
                })
            }
            (DocumentStatus::Open, version) if version != commit.expected_version => {
                return Err(AppError::ConcurrencyConflict(format!(
                    "{} {} changed while closing",
                    commit.kind, commit.document_id
                )))
            }
            (DocumentStatus::Open, _) => {}
        }

        let mut movements = Vec::with_capacity(commit.movements.len());
        for movement in &commit.movements {
            movements.push(Self::insert_movement(&mut tx, movement).await?);
        }

        // Compare-and-set on the status column backs up the row lock
        let sql = format!(
            "UPDATE {} SET status = 'closed', closed_at = $2, closed_by = $3, total = $4, \
             version = version + 1, updated_at = $2 \
             WHERE id = $1 AND status = 'open'",
            header
        );
        let result = sqlx::query(&sql)
            .bind(commit.document_id)
            .bind(commit.closed_at)
            .bind(commit.closed_by)
            .bind(commit.total)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(AppError::AlreadyClosed {
                kind: commit.kind,
                id: commit.document_id,
            });
        }

        let document = Self::load_document(&mut tx, commit.kind, commit.document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(commit.kind.to_string()))?;
        tx.commit().await.map_err(db_error)?;

        Ok(ClosedDocument {
            document,
            movements,
        })
    }

    async fn upsert_daily(&self, rows: &[DailyMovement]) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        for row in rows {
            let t = &row.totals;
            sqlx::query(
                r#"
                INSERT INTO inventory_item_movements_daily (
                    product_id, date, increments, decrements, net_delta, purchased,
                    purchase_returned, wasted, sold, sale_returned, stocktaking_adjusted,
                    movement_count, closing_quantity, aggregated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (product_id, date) DO UPDATE SET
                    increments = EXCLUDED.increments,
                    decrements = EXCLUDED.decrements,
                    net_delta = EXCLUDED.net_delta,
                    purchased = EXCLUDED.purchased,
                    purchase_returned = EXCLUDED.purchase_returned,
                    wasted = EXCLUDED.wasted,
                    sold = EXCLUDED.sold,
                    sale_returned = EXCLUDED.sale_returned,
                    stocktaking_adjusted = EXCLUDED.stocktaking_adjusted,
                    movement_count = EXCLUDED.movement_count,
                    closing_quantity = EXCLUDED.closing_quantity,
                    aggregated_at = EXCLUDED.aggregated_at
                "#,
            )
            .bind(row.product_id)
            .bind(row.date)
            .bind(t.increments)
            .bind(t.decrements)
            .bind(t.net_delta)
            .bind(t.purchased)
            .bind(t.purchase_returned)
            .bind(t.wasted)
            .bind(t.sold)
            .bind(t.sale_returned)
            .bind(t.stocktaking_adjusted)
            .bind(t.movement_count)
            .bind(row.closing_quantity)
            .bind(row.aggregated_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn daily_rows(
        &self,
        product_ids: Option<&[Uuid]>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<DailyMovement>> {
        let rows = sqlx::query_as::<_, DailyRow>(
            r#"
            SELECT product_id, date, increments, decrements, net_delta, purchased,
                   purchase_returned, wasted, sold, sale_returned, stocktaking_adjusted,
                   movement_count, closing_quantity, aggregated_at
            FROM inventory_item_movements_daily
            WHERE ($1::uuid[] IS NULL OR product_id = ANY($1))
              AND date BETWEEN $2 AND $3
            ORDER BY date, product_id
            "#,
        )
        .bind(product_ids.map(|ids| ids.to_vec()))
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(DailyMovement::from).collect())
    }

    async fn aggregation_watermark(&self) -> AppResult<Option<NaiveDate>> {
        let watermark = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT aggregated_through FROM inventory_aggregation_state WHERE id = 1",
        )
        .fetch_optional(&self.db)
        .await?;

        Ok(watermark)
    }

    async fn set_aggregation_watermark(&self, day: NaiveDate) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_aggregation_state (id, aggregated_through, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE SET aggregated_through = EXCLUDED.aggregated_through,
                                           updated_at = NOW()
            "#,
        )
        .bind(day)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_kind_has_its_own_tables() {
        let mut seen = std::collections::HashSet::new();
        for kind in DocumentKind::ALL {
            let (header, items) = tables(kind);
            assert!(items.starts_with(header.trim_end_matches('s')));
            assert!(seen.insert(header));
        }
    }
}
