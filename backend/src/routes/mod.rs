//! Route definitions for the Stockroom API

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/inventory", inventory_routes())
        .nest("/documents", document_routes())
        .nest("/reports", report_routes())
}

/// Stock cache and ledger routes
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/low-stock", get(handlers::get_low_stock))
        .route("/movements", post(handlers::record_movement))
        .route("/:product_id", get(handlers::get_stock))
        .route("/:product_id/movements", get(handlers::list_movements))
        .route("/:product_id/verify", get(handlers::verify_stock))
}

/// Stock-affecting document routes, shared by every document kind
fn document_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:kind",
            get(handlers::list_documents).post(handlers::create_document),
        )
        .route(
            "/:kind/:id",
            get(handlers::get_document)
                .put(handlers::update_document)
                .delete(handlers::delete_document),
        )
        .route("/:kind/:id/items", post(handlers::add_document_item))
        .route(
            "/:kind/:id/items/:item_id",
            put(handlers::update_document_item).delete(handlers::remove_document_item),
        )
        .route("/:kind/:id/close", post(handlers::close_document))
}

/// Reporting routes
fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/reconciliation", get(handlers::get_reconciliation_report))
        .route("/daily-aggregation", post(handlers::run_daily_aggregation))
}
