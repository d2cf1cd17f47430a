use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::payouts::{ActionResponse, PayoutError, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Payout(#[from] PayoutError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Payout(PayoutError::Store(err))
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Payout(err) => match err {
                PayoutError::InvariantViolation(_) | PayoutError::PermanentProcessor { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PayoutError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
                PayoutError::TransientProcessor { .. } => StatusCode::SERVICE_UNAVAILABLE,
                PayoutError::NotFound { .. } => StatusCode::NOT_FOUND,
                PayoutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to show an operator; storage and processor internals stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Payout(PayoutError::Store(_)) => "Internal error".to_string(),
            AppError::Payout(PayoutError::PermanentProcessor { processor, .. }) => {
                format!("{processor} rejected the request")
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::warn!(?self);
        }
        let body = ActionResponse::failure(self.public_message());
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
