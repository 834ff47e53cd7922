use axum::http::StatusCode;
use thiserror::Error;

use crate::models::assignment::{SeatAction, SeatStatus};
use crate::models::grant::GrantRef;

/// Domain errors of the booking engine. Controllers map these onto HTTP
/// statuses with `status_code()`; the sweeper and promoter collect them
/// per item and keep going.
#[derive(Debug, Error)]
pub enum BookingError {
    /// Lost the row-level race or the seat was already taken. Never retried
    /// automatically; the caller must re-query availability.
    #[error("seat is no longer available")]
    SeatNotAvailable,

    #[error("user {user_id} has no usable credit for discipline {discipline_id}")]
    NoEligibleCredit { user_id: i64, discipline_id: i64 },

    /// A concurrent consumption emptied the grant between selection and debit.
    #[error("grant {0} has no remaining credit")]
    InsufficientCredit(GrantRef),

    /// The grant expired or was suspended between selection and debit.
    #[error("grant {0} is not active")]
    GrantNotActive(GrantRef),

    /// Illegal state-machine transition; stale client state or a bug.
    #[error("cannot {action:?} a seat in state {from:?}")]
    InvalidTransition { from: SeatStatus, action: SeatAction },

    /// Refunding a grant that was never debited. Ledger bug, must stay loud.
    #[error("refund mismatch on grant {0}")]
    RefundMismatch(GrantRef),

    /// Guarded compare-and-swap found a different status than expected.
    #[error("stale state, expected {expected:?}")]
    StaleState { expected: SeatStatus },

    #[error("occurrence {0} does not accept bookings")]
    OccurrenceNotBookable(i64),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

impl BookingError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        BookingError::NotFound { entity, id }
    }

    /// Stable machine-readable tag for per-seat batch results.
    pub fn tag(&self) -> &'static str {
        match self {
            BookingError::SeatNotAvailable => "seat_not_available",
            BookingError::NoEligibleCredit { .. } => "no_eligible_credit",
            BookingError::InsufficientCredit(_) => "insufficient_credit",
            BookingError::GrantNotActive(_) => "grant_not_active",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::RefundMismatch(_) => "refund_mismatch",
            BookingError::StaleState { .. } => "stale_state",
            BookingError::OccurrenceNotBookable(_) => "occurrence_not_bookable",
            BookingError::NotFound { .. } => "not_found",
            BookingError::Storage(_) => "storage_error",
        }
    }

    /// HTTP mapping. "Seat taken" (409) and "no credit" (422) must stay
    /// distinguishable so the client can offer the right remedy.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::SeatNotAvailable => StatusCode::CONFLICT,
            BookingError::NoEligibleCredit { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::InsufficientCredit(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::GrantNotActive(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
            BookingError::StaleState { .. } => StatusCode::CONFLICT,
            BookingError::OccurrenceNotBookable(_) => StatusCode::CONFLICT,
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::RefundMismatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Controller helper: log server-side faults, hand the rest to the client.
pub fn api_error(err: BookingError) -> (StatusCode, String) {
    match &err {
        BookingError::RefundMismatch(_) => {
            tracing::error!("ledger consistency violation: {}", err);
        }
        BookingError::Storage(e) => {
            tracing::error!("storage error: {:?}", e);
        }
        BookingError::InvalidTransition { .. } => {
            tracing::error!("invalid transition requested: {}", err);
        }
        _ => {}
    }
    (err.status_code(), err.to_string())
}
