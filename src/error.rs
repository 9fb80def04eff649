use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::delivery::DeliveryStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("driver {0} is not verified")]
    NotVerified(Uuid),

    #[error("no usable gps fix")]
    LocationUnavailable,

    #[error("no eligible drivers")]
    NoEligibleDrivers,

    #[error("offer no longer available")]
    OfferExpired,

    #[error("transition not allowed: {from:?} -> {to:?}")]
    TransitionNotAllowed {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotVerified(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::LocationUnavailable => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::NoEligibleDrivers => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::OfferExpired => (StatusCode::CONFLICT, self.to_string()),
            AppError::TransitionNotAllowed { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::PublishFailed(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
