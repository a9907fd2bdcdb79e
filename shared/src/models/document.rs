//! Stock-affecting documents: purchase invoices, purchase returns, waste
//! records and stocktakings
//!
//! A document is editable while `Open`. Closing it is the one-way transition
//! that writes its movements to the ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Movement, MovementOperation, MovementReason, MovementSource, NewMovement};
use crate::types::ParseTagError;

/// Kind of stock-affecting document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PurchaseInvoice,
    ReturnPurchaseInvoice,
    Waste,
    Stocktaking,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::PurchaseInvoice,
        DocumentKind::ReturnPurchaseInvoice,
        DocumentKind::Waste,
        DocumentKind::Stocktaking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseInvoice => "purchase_invoice",
            DocumentKind::ReturnPurchaseInvoice => "return_purchase_invoice",
            DocumentKind::Waste => "waste",
            DocumentKind::Stocktaking => "stocktaking",
        }
    }

    /// URL path segment used by the HTTP API
    pub fn path_segment(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseInvoice => "purchase-invoices",
            DocumentKind::ReturnPurchaseInvoice => "purchase-returns",
            DocumentKind::Waste => "wastes",
            DocumentKind::Stocktaking => "stocktakings",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.path_segment() == segment)
    }

    /// Reason tag written on every movement this kind produces
    pub fn movement_reason(&self) -> MovementReason {
        match self {
            DocumentKind::PurchaseInvoice => MovementReason::Purchase,
            DocumentKind::ReturnPurchaseInvoice => MovementReason::PurchaseReturn,
            DocumentKind::Waste => MovementReason::Waste,
            DocumentKind::Stocktaking => MovementReason::StocktakingAdjustment,
        }
    }

    pub fn source(&self, document_id: Uuid) -> MovementSource {
        match self {
            DocumentKind::PurchaseInvoice => MovementSource::PurchaseInvoice(document_id),
            DocumentKind::ReturnPurchaseInvoice => {
                MovementSource::ReturnPurchaseInvoice(document_id)
            }
            DocumentKind::Waste => MovementSource::Waste(document_id),
            DocumentKind::Stocktaking => MovementSource::Stocktaking(document_id),
        }
    }

    pub fn has_stock_snapshot(&self) -> bool {
        matches!(self, DocumentKind::Stocktaking)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::PurchaseInvoice => write!(f, "Purchase invoice"),
            DocumentKind::ReturnPurchaseInvoice => write!(f, "Purchase return"),
            DocumentKind::Waste => write!(f, "Waste record"),
            DocumentKind::Stocktaking => write!(f, "Stocktaking"),
        }
    }
}

impl FromStr for DocumentKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseTagError::new("document kind", s))
    }
}

/// Lifecycle state of a document. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Open,
    Closed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Open => "open",
            DocumentStatus::Closed => "closed",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(DocumentStatus::Open),
            "closed" => Ok(DocumentStatus::Closed),
            _ => Err(ParseTagError::new("document status", s)),
        }
    }
}

/// A line item of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub id: Uuid,
    pub position: i32,
    pub product_id: Uuid,
    /// Moved quantity; for stocktakings, the physically counted (real) quantity
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    /// System quantity at count time. Only present on stocktaking lines.
    pub stock_quantity: Option<Decimal>,
}

/// A stock-affecting document with its line items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDocument {
    pub id: Uuid,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    /// Supplier or other counterparty, when the kind has one
    pub counterparty_id: Option<Uuid>,
    pub notes: Option<String>,
    /// Running total while open, frozen on close
    pub total: Decimal,
    /// Bumped on every persisted edit; guards against lost updates
    pub version: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
    pub lines: Vec<DocumentLine>,
}

/// A document that was just closed, with the movements the close produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedDocument {
    pub document: StockDocument,
    pub movements: Vec<Movement>,
}

/// Line total: quantity × unit price. `None` on overflow.
pub fn line_total(quantity: Decimal, unit_price: Decimal) -> Option<Decimal> {
    quantity.checked_mul(unit_price)
}

pub fn document_total(lines: &[DocumentLine]) -> Option<Decimal> {
    lines
        .iter()
        .try_fold(Decimal::ZERO, |sum, line| sum.checked_add(line.total))
}

/// Signed stock effect of one line when its document closes
pub fn line_delta(kind: DocumentKind, line: &DocumentLine) -> Decimal {
    match kind {
        DocumentKind::PurchaseInvoice => line.quantity,
        DocumentKind::ReturnPurchaseInvoice | DocumentKind::Waste => -line.quantity,
        DocumentKind::Stocktaking => {
            line.quantity - line.stock_quantity.unwrap_or(Decimal::ZERO)
        }
    }
}

/// Movements produced by closing `document`, one per line with a non-zero
/// delta, in line order.
pub fn close_movements(
    document: &StockDocument,
    actor_id: Uuid,
    occurred_at: DateTime<Utc>,
) -> Vec<NewMovement> {
    let reason = document.kind.movement_reason();
    let source = document.kind.source(document.id);

    document
        .lines
        .iter()
        .filter_map(|line| {
            let delta = line_delta(document.kind, line);
            MovementOperation::for_delta(delta).map(|operation| NewMovement {
                product_id: line.product_id,
                delta,
                operation,
                reason,
                source,
                actor_id,
                occurred_at,
            })
        })
        .collect()
}
