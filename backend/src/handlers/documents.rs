//! HTTP handlers for stock-affecting documents
//!
//! All four document kinds share these handlers; the kind comes from the
//! first path segment after `/documents`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use shared::{ClosedDocument, DocumentKind, DocumentStatus, StockDocument};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::Actor;
use crate::services::closing::ClosingService;
use crate::services::documents::{
    CreateDocumentInput, DocumentItemInput, DocumentService, UpdateDocumentInput,
    UpdateItemInput,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    /// "open" or "closed"
    pub status: Option<String>,
}

fn parse_kind(segment: &str) -> AppResult<DocumentKind> {
    DocumentKind::from_path_segment(segment)
        .ok_or_else(|| AppError::NotFound(format!("Document kind '{}'", segment)))
}

/// List documents of a kind
pub async fn list_documents(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ListDocumentsQuery>,
) -> AppResult<Json<Vec<StockDocument>>> {
    let kind = parse_kind(&kind)?;
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<DocumentStatus>())
        .transpose()
        .map_err(|e| AppError::validation("status", &e.to_string()))?;

    let service = DocumentService::new(state.store);
    let documents = service.list(kind, status).await?;
    Ok(Json(documents))
}

/// Create an open document
pub async fn create_document(
    State(state): State<AppState>,
    Actor(actor_id): Actor,
    Path(kind): Path<String>,
    Json(input): Json<CreateDocumentInput>,
) -> AppResult<(StatusCode, Json<StockDocument>)> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.store);
    let document = service.create(kind, actor_id, input).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// Get a document with its items
pub async fn get_document(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> AppResult<Json<StockDocument>> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.store);
    let document = service.get(kind, id).await?;
    Ok(Json(document))
}

/// Update a document header
pub async fn update_document(
    State(state): State<AppState>,
    _actor: Actor,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(input): Json<UpdateDocumentInput>,
) -> AppResult<Json<StockDocument>> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.store);
    let document = service.update_header(kind, id, input).await?;
    Ok(Json(document))
}

/// Delete an open document
pub async fn delete_document(
    State(state): State<AppState>,
    _actor: Actor,
    Path((kind, id)): Path<(String, Uuid)>,
) -> AppResult<StatusCode> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.store);
    service.delete(kind, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a line item
pub async fn add_document_item(
    State(state): State<AppState>,
    _actor: Actor,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(input): Json<DocumentItemInput>,
) -> AppResult<Json<StockDocument>> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.store);
    let document = service.add_item(kind, id, input).await?;
    Ok(Json(document))
}

/// Update a line item
pub async fn update_document_item(
    State(state): State<AppState>,
    _actor: Actor,
    Path((kind, id, item_id)): Path<(String, Uuid, Uuid)>,
    Json(input): Json<UpdateItemInput>,
) -> AppResult<Json<StockDocument>> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.store);
    let document = service.update_item(kind, id, item_id, input).await?;
    Ok(Json(document))
}

/// Remove a line item
pub async fn remove_document_item(
    State(state): State<AppState>,
    _actor: Actor,
    Path((kind, id, item_id)): Path<(String, Uuid, Uuid)>,
) -> AppResult<Json<StockDocument>> {
    let kind = parse_kind(&kind)?;
    let service = DocumentService::new(state.store);
    let document = service.remove_item(kind, id, item_id).await?;
    Ok(Json(document))
}

/// Close a document, moving its items into the ledger
pub async fn close_document(
    State(state): State<AppState>,
    Actor(actor_id): Actor,
    Path((kind, id)): Path<(String, Uuid)>,
) -> AppResult<Json<ClosedDocument>> {
    let kind = parse_kind(&kind)?;
    let service = ClosingService::new(state.store);
    let closed = service.close(kind, id, actor_id).await?;
    Ok(Json(closed))
}
