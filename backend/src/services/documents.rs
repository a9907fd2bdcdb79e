//! Stock-affecting document service
//!
//! Handles the editable half of the document lifecycle. Every edit goes
//! through `mutate`, which refuses closed documents and saves with an
//! optimistic version check so an edit can never land after a close.
//! Edits check the status before the input, so a closed document always
//! answers `DocumentClosed`.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{
    document_total, line_total, validate_quantity, validate_stock_snapshot, validate_unit_price,
    DocumentKind, DocumentLine, DocumentStatus, StockDocument,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::store::InventoryStore;

/// Document service for creating and editing open documents
#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn InventoryStore>,
}

/// A line item as submitted by a client
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentItemInput {
    pub product_id: Uuid,
    /// Moved quantity, or the counted quantity on a stocktaking
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    /// Stocktaking only; the current cached quantity when omitted
    pub stock_quantity: Option<Decimal>,
}

/// Input for creating a document
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateDocumentInput {
    pub counterparty_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<DocumentItemInput>,
}

/// Input for updating a document header. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateDocumentInput {
    pub counterparty_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Input for updating a line item. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateItemInput {
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub stock_quantity: Option<Decimal>,
}

fn check_quantity(quantity: Decimal) -> AppResult<()> {
    validate_quantity(quantity).map_err(|msg| AppError::invalid_quantity("quantity", msg))
}

fn check_unit_price(unit_price: Decimal) -> AppResult<()> {
    validate_unit_price(unit_price).map_err(|msg| AppError::invalid_quantity("unit_price", msg))
}

fn check_snapshot(kind: DocumentKind, stock_quantity: Option<Decimal>) -> AppResult<()> {
    validate_stock_snapshot(kind, stock_quantity)
        .map_err(|msg| AppError::validation("stock_quantity", msg))
}

fn checked_line_total(quantity: Decimal, unit_price: Decimal) -> AppResult<Decimal> {
    line_total(quantity, unit_price)
        .ok_or_else(|| AppError::invalid_quantity("quantity", "Line total is out of range"))
}

/// Renumber positions and recompute line and document totals
fn recompute(document: &mut StockDocument) -> AppResult<()> {
    for (position, line) in document.lines.iter_mut().enumerate() {
        line.position = position as i32;
        line.total = checked_line_total(line.quantity, line.unit_price)?;
    }
    document.total = document_total(&document.lines)
        .ok_or_else(|| AppError::invalid_quantity("quantity", "Document total is out of range"))?;
    Ok(())
}

impl DocumentService {
    /// Create a new DocumentService instance
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Create an open document
    pub async fn create(
        &self,
        kind: DocumentKind,
        actor_id: Uuid,
        input: CreateDocumentInput,
    ) -> AppResult<StockDocument> {
        input.validate()?;

        let mut lines = Vec::with_capacity(input.items.len());
        for item in &input.items {
            lines.push(self.build_line(kind, item).await?);
        }

        let now = Utc::now();
        let mut document = StockDocument {
            id: Uuid::new_v4(),
            kind,
            status: DocumentStatus::Open,
            counterparty_id: input.counterparty_id,
            notes: input.notes,
            total: Decimal::ZERO,
            version: 1,
            created_by: actor_id,
            created_at: now,
            updated_at: now,
            closed_at: None,
            closed_by: None,
            lines,
        };
        recompute(&mut document)?;

        self.store.insert_document(&document).await?;
        tracing::debug!(kind = kind.as_str(), document_id = %document.id, "Created document");
        Ok(document)
    }

    /// Get a document with its line items
    pub async fn get(&self, kind: DocumentKind, id: Uuid) -> AppResult<StockDocument> {
        self.store
            .find_document(kind, id)
            .await?
            .ok_or_else(|| AppError::NotFound(kind.to_string()))
    }

    /// List documents of a kind, newest first
    pub async fn list(
        &self,
        kind: DocumentKind,
        status: Option<DocumentStatus>,
    ) -> AppResult<Vec<StockDocument>> {
        self.store.list_documents(kind, status).await
    }

    pub async fn update_header(
        &self,
        kind: DocumentKind,
        id: Uuid,
        input: UpdateDocumentInput,
    ) -> AppResult<StockDocument> {
        self.open(kind, id).await?;
        input.validate()?;

        self.mutate(kind, id, |document| {
            if let Some(counterparty_id) = input.counterparty_id {
                document.counterparty_id = Some(counterparty_id);
            }
            if let Some(notes) = input.notes {
                document.notes = Some(notes);
            }
            Ok(())
        })
        .await
    }

    pub async fn add_item(
        &self,
        kind: DocumentKind,
        id: Uuid,
        input: DocumentItemInput,
    ) -> AppResult<StockDocument> {
        self.open(kind, id).await?;
        let line = self.build_line(kind, &input).await?;

        self.mutate(kind, id, move |document| {
            document.lines.push(line);
            Ok(())
        })
        .await
    }

    pub async fn update_item(
        &self,
        kind: DocumentKind,
        id: Uuid,
        item_id: Uuid,
        input: UpdateItemInput,
    ) -> AppResult<StockDocument> {
        self.open(kind, id).await?;
        if let Some(quantity) = input.quantity {
            check_quantity(quantity)?;
        }
        if let Some(unit_price) = input.unit_price {
            check_unit_price(unit_price)?;
        }
        check_snapshot(kind, input.stock_quantity)?;

        self.mutate(kind, id, |document| {
            let line = document
                .lines
                .iter_mut()
                .find(|line| line.id == item_id)
                .ok_or_else(|| AppError::NotFound("Document item".to_string()))?;

            if let Some(quantity) = input.quantity {
                line.quantity = quantity;
            }
            if let Some(unit_price) = input.unit_price {
                line.unit_price = unit_price;
            }
            if input.stock_quantity.is_some() {
                line.stock_quantity = input.stock_quantity;
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_item(
        &self,
        kind: DocumentKind,
        id: Uuid,
        item_id: Uuid,
    ) -> AppResult<StockDocument> {
        self.mutate(kind, id, |document| {
            let before = document.lines.len();
            document.lines.retain(|line| line.id != item_id);
            if document.lines.len() == before {
                return Err(AppError::NotFound("Document item".to_string()));
            }
            Ok(())
        })
        .await
    }

    /// Delete an open document. Closed documents are permanent.
    pub async fn delete(&self, kind: DocumentKind, id: Uuid) -> AppResult<()> {
        self.open(kind, id).await?;
        self.store.delete_open_document(kind, id).await?;
        tracing::debug!(kind = kind.as_str(), document_id = %id, "Deleted document");
        Ok(())
    }

    /// Load a document, refusing closed ones
    async fn open(&self, kind: DocumentKind, id: Uuid) -> AppResult<StockDocument> {
        let document = self.get(kind, id).await?;
        match document.status {
            DocumentStatus::Open => Ok(document),
            DocumentStatus::Closed => Err(AppError::DocumentClosed { kind, id }),
        }
    }

    /// Apply an edit to an open document and persist it against the version
    /// it was read at
    async fn mutate<F>(&self, kind: DocumentKind, id: Uuid, edit: F) -> AppResult<StockDocument>
    where
        F: FnOnce(&mut StockDocument) -> AppResult<()>,
    {
        let current = self.open(kind, id).await?;
        let expected_version = current.version;

        let mut document = current;
        edit(&mut document)?;
        recompute(&mut document)?;
        document.version = expected_version + 1;
        document.updated_at = Utc::now();

        self.store
            .save_open_document(&document, expected_version)
            .await?;
        Ok(document)
    }

    async fn build_line(
        &self,
        kind: DocumentKind,
        input: &DocumentItemInput,
    ) -> AppResult<DocumentLine> {
        check_quantity(input.quantity)?;
        check_unit_price(input.unit_price)?;
        check_snapshot(kind, input.stock_quantity)?;

        if self.store.get_product(input.product_id).await?.is_none() {
            return Err(AppError::UnknownProduct(input.product_id));
        }

        let stock_quantity = match (kind.has_stock_snapshot(), input.stock_quantity) {
            (true, None) => Some(self.store.inventory_item(input.product_id).await?.quantity),
            (_, given) => given,
        };

        Ok(DocumentLine {
            id: Uuid::new_v4(),
            position: 0,
            product_id: input.product_id,
            quantity: input.quantity,
            unit_price: input.unit_price,
            total: checked_line_total(input.quantity, input.unit_price)?,
            stock_quantity,
        })
    }
}
