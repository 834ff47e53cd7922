use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::grant::{CreditKind, GrantRef};
use crate::errors::BookingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "seat_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Available,
    Reserved,
    Occupied,
    Completed,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatAction {
    Reserve,
    Confirm,
    Release,
    Complete,
    Block,
    Unblock,
}

impl SeatStatus {
    /// The transition table: from-state x action -> to-state. Anything not
    /// listed here is illegal, no string comparisons anywhere else.
    pub fn apply(self, action: SeatAction) -> Result<SeatStatus, BookingError> {
        use SeatAction::*;
        use SeatStatus::*;
        match (self, action) {
            (Available, Reserve) => Ok(Reserved),
            (Reserved, Confirm) => Ok(Occupied),
            (Reserved, Release) | (Occupied, Release) => Ok(Available),
            (Occupied, Complete) => Ok(Completed),
            (Available, Block) | (Reserved, Block) | (Occupied, Block) => Ok(Blocked),
            (Blocked, Unblock) => Ok(Available),
            (from, action) => Err(BookingError::InvalidTransition { from, action }),
        }
    }
}

/// The bookable unit: one row per (occurrence, seat) pair. The row itself is
/// the uniqueness guarantee; every status change goes through the store's
/// guarded compare-and-swap, never a blind update.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SeatAssignment {
    pub id: i64,
    pub occurrence_id: i64,
    pub seat_id: i64,
    pub status: SeatStatus,
    pub holder_user_id: Option<i64>,
    pub waiting_user_id: Option<i64>,
    pub consumed_credit_kind: Option<CreditKind>,
    pub consumed_credit_id: Option<i64>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SeatAssignment {
    /// Which grant paid for this seat, if any.
    pub fn consumed_credit(&self) -> Option<GrantRef> {
        match (self.consumed_credit_kind, self.consumed_credit_id) {
            (Some(kind), Some(id)) => Some(GrantRef::from_parts(kind, id)),
            _ => None,
        }
    }
}

/// Full replacement set for the mutable columns of a seat assignment,
/// written atomically together with the status by `transition_assignment`.
/// `default()` clears everything, which is exactly the release shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentPatch {
    pub holder_user_id: Option<i64>,
    pub waiting_user_id: Option<i64>,
    pub consumed_credit: Option<GrantRef>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}
