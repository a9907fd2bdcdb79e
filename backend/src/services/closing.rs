//! Closing transaction
//!
//! Closing is the one-way transition that moves a document's lines into the
//! ledger. The service derives the movements from the version of the
//! document it read; the store commits them, updates the cache and flips the
//! status in one unit of work, rejecting the commit if that version is stale.

use chrono::Utc;
use shared::{close_movements, document_total, ClosedDocument, DocumentKind, DocumentStatus};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{CloseCommit, InventoryStore};

#[derive(Clone)]
pub struct ClosingService {
    store: Arc<dyn InventoryStore>,
}

impl ClosingService {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Close a document, writing exactly one movement per line with a
    /// non-zero delta. Fails with `AlreadyClosed` if it was closed before,
    /// in which case nothing is written.
    pub async fn close(
        &self,
        kind: DocumentKind,
        id: Uuid,
        actor_id: Uuid,
    ) -> AppResult<ClosedDocument> {
        let document = self
            .store
            .find_document(kind, id)
            .await?
            .ok_or_else(|| AppError::NotFound(kind.to_string()))?;

        match document.status {
            DocumentStatus::Open => {}
            DocumentStatus::Closed => return Err(AppError::AlreadyClosed { kind, id }),
        }
        let total = document_total(&document.lines).ok_or_else(|| {
            AppError::invalid_quantity("quantity", "Document total is out of range")
        })?;

        let closed_at = Utc::now();
        let commit = CloseCommit {
            kind,
            document_id: id,
            expected_version: document.version,
            movements: close_movements(&document, actor_id, closed_at),
            total,
            closed_at,
            closed_by: actor_id,
        };

        let closed = self.store.commit_close(commit).await.map_err(|err| {
            tracing::warn!(kind = kind.as_str(), document_id = %id, error = %err, "Close failed");
            err
        })?;

        tracing::info!(
            kind = kind.as_str(),
            document_id = %id,
            closed_by = %actor_id,
            lines = closed.document.lines.len(),
            movements = closed.movements.len(),
            "Closed document"
        );
        Ok(closed)
    }
}
