//! Unified error handling for the peer server.

use crate::protocol::ErrorResponse;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tether_engine::Error as EngineError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Store(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Store(StoreError::Engine(e)) => match e {
                EngineError::EntityNotFound(_) | EngineError::RecordNotFound(_) => {
                    (StatusCode::NOT_FOUND, e.to_string(), None)
                }
                EngineError::DuplicateNaturalKey { .. } => {
                    (StatusCode::CONFLICT, e.to_string(), None)
                }
                EngineError::InvalidPayload(_)
                | EngineError::InvalidNaturalKey { .. }
                | EngineError::MissingParentLink(_) => {
                    tracing::warn!("Rejected payload: {}", e);
                    (StatusCode::BAD_REQUEST, e.to_string(), None)
                }
                _ => {
                    tracing::error!("Engine error: {:?}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                        Some(e.to_string()),
                    )
                }
            },
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Store error".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
