//! errors.rs
//! Taxonomía de errores expuesta al cliente HTTP.
//!
//! Los fallos por ítem no pasan por aquí: se registran en
//! `results.failedItems` y solo se ven consultando el estado.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BulkError {
    /// Payload mal formado; la operación nunca se crea.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// La operación existe pero no está en un estado que permita la acción.
    #[error("{0}")]
    InvalidState(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BulkError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BulkError::Validation(msg.into())
    }

    pub fn operation_not_found(operation_id: &str) -> Self {
        BulkError::NotFound(format!("Operation not found: {operation_id}"))
    }
}

impl ResponseError for BulkError {
    fn status_code(&self) -> StatusCode {
        match self {
            BulkError::Validation(_) => StatusCode::BAD_REQUEST,
            BulkError::NotFound(_) => StatusCode::NOT_FOUND,
            BulkError::InvalidState(_) => StatusCode::CONFLICT,
            BulkError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BulkError::Forbidden(_) => StatusCode::FORBIDDEN,
            BulkError::Database(_) | BulkError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            BulkError::Validation(_) => "Validation error",
            BulkError::NotFound(_) => "Not found",
            BulkError::InvalidState(_) => "Invalid operation state",
            BulkError::Unauthorized(_) => "Authentication required",
            BulkError::Forbidden(_) => "Admin access required",
            BulkError::Database(_) | BulkError::Internal(_) => "Internal server error",
        };

        // No filtramos detalles de la base de datos al cliente
        let detail = match self {
            BulkError::Database(e) => {
                log::error!("Database error: {:?}", e);
                "Database operation failed".to_string()
            }
            BulkError::Internal(e) => {
                log::error!("Internal error: {:?}", e);
                e.to_string()
            }
            BulkError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": message,
            "error": detail
        }))
    }
}

pub type BulkResult<T> = Result<T, BulkError>;
