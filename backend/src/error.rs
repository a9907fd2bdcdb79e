//! Error handling for the Stockroom inventory ledger
//!
//! Every failure surfaced to a caller maps to a stable error code so that
//! clients can tell a closed document from a lost race.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::DocumentKind;
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Ledger and document rules
    #[error("Unknown product: {0}")]
    UnknownProduct(Uuid),

    #[error("{kind} {id} is closed and can no longer be changed")]
    DocumentClosed { kind: DocumentKind, id: Uuid },

    #[error("{kind} {id} is already closed")]
    AlreadyClosed { kind: DocumentKind, id: Uuid },

    #[error("Invalid quantity: {message}")]
    InvalidQuantity { field: String, message: String },

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    // Request errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Missing actor")]
    MissingActor,

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid_quantity(field: &str, message: &str) -> Self {
        AppError::InvalidQuantity {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn validation(field: &str, message: &str) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::UnknownProduct(_) => "UNKNOWN_PRODUCT",
            AppError::DocumentClosed { .. } => "DOCUMENT_CLOSED",
            AppError::AlreadyClosed { .. } => "ALREADY_CLOSED",
            AppError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            AppError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::MissingActor => "MISSING_ACTOR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::UnknownProduct(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DocumentClosed { .. } | AppError::AlreadyClosed { .. } => {
                StatusCode::CONFLICT
            }
            AppError::InvalidQuantity { .. } | AppError::Validation { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MissingActor => StatusCode::UNAUTHORIZED,
            AppError::DatabaseError(_) | AppError::Internal(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|f| f.to_string())
            .unwrap_or_default();
        AppError::Validation {
            field,
            message: errors.to_string(),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Never leak driver details to clients
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            AppError::NotFound(resource) => format!("{} not found", resource),
            AppError::MissingActor => "An X-Actor-Id header is required".to_string(),
            other => other.to_string(),
        };
        let field = match &self {
            AppError::InvalidQuantity { field, .. } | AppError::Validation { field, .. } => {
                Some(field.clone())
            }
            _ => None,
        };

        // Log the error for debugging
        tracing::error!("Error: {:?}", self);

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                field,
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for services and handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_errors_are_conflicts() {
        let id = Uuid::new_v4();
        let kind = DocumentKind::Waste;
        assert_eq!(AppError::AlreadyClosed { kind, id }.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::DocumentClosed { kind, id }.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::ConcurrencyConflict("lock".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::AlreadyClosed { kind, id }.code(), "ALREADY_CLOSED");
    }

    #[test]
    fn test_request_errors() {
        assert_eq!(
            AppError::invalid_quantity("quantity", "negative").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::UnknownProduct(Uuid::new_v4()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::MissingActor.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::NotFound("Waste record".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_message_names_the_document() {
        let id = Uuid::nil();
        let err = AppError::DocumentClosed {
            kind: DocumentKind::PurchaseInvoice,
            id,
        };
        assert_eq!(
            err.to_string(),
            format!("Purchase invoice {} is closed and can no longer be changed", id)
        );
    }
}
