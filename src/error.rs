use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::delivery::DeliveryStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("delivery {0} not found")]
    DeliveryNotFound(Uuid),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("missing or invalid bearer token")]
    Unauthenticated,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::DeliveryNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::InvalidStatusTransition { .. } | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::InvalidStatusTransition { from, to } => json!({
                "error": self.to_string(),
                "code": "InvalidStatusTransition",
                "from": from,
                "to": to,
            }),
            _ => json!({
                "error": self.to_string()
            }),
        };

        (status, Json(body)).into_response()
    }
}
