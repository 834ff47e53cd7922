use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::grant::{CreditKind, GrantRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "waiting_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WaitingStatus {
    Waiting,
    Notified,
    Confirmed,
    Expired,
    Cancelled,
}

/// A user queued for a fully booked occurrence. `created_at` defines the
/// FIFO order the promoter walks.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WaitingListEntry {
    pub id: i64,
    pub occurrence_id: i64,
    pub user_id: i64,
    pub status: WaitingStatus,
    pub preselected_credit_kind: Option<CreditKind>,
    pub preselected_credit_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl WaitingListEntry {
    pub fn preselected_credit(&self) -> Option<GrantRef> {
        match (self.preselected_credit_kind, self.preselected_credit_id) {
            (Some(kind), Some(id)) => Some(GrantRef::from_parts(kind, id)),
            _ => None,
        }
    }
}
