use thiserror::Error;
use uuid::Uuid;

use super::models::{PaymentState, Processor};
use super::store::StoreError;

/// key: payout-errors -> taxonomy shared by scheduler, state machine and admin surface
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("{processor} is temporarily unavailable; try again later")]
    TransientProcessor { processor: Processor },
    #[error("{processor} rejected the transfer ({})", failure_reason.as_deref().unwrap_or("unknown"))]
    PermanentProcessor {
        processor: Processor,
        failure_reason: Option<String>,
    },
    #[error("payment {payment_id} changed concurrently and is now {current_state}")]
    ConcurrencyConflict {
        payment_id: Uuid,
        current_state: PaymentState,
    },
    #[error("{0}")]
    InvariantViolation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PayoutError {
    pub fn invariant(message: impl Into<String>) -> Self {
        PayoutError::InvariantViolation(message.into())
    }

    pub fn payment_not_found(payment_id: Uuid) -> Self {
        PayoutError::NotFound {
            entity: "payment",
            id: payment_id.to_string(),
        }
    }

    pub fn seller_not_found(seller_id: i64) -> Self {
        PayoutError::NotFound {
            entity: "seller",
            id: seller_id.to_string(),
        }
    }
}

pub type PayoutResult<T> = Result<T, PayoutError>;
