use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "occurrence_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Postponed,
}

impl OccurrenceStatus {
    /// Cancelled occurrences are immutable; completed ones only re-open
    /// through paths out of scope here.
    pub fn is_terminal(self) -> bool {
        matches!(self, OccurrenceStatus::Cancelled | OccurrenceStatus::Completed)
    }
}

/// One scheduled instance of a class at a studio.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClassOccurrence {
    pub id: i64,
    pub discipline_id: i64,
    pub studio_id: i64,
    pub capacity: i32,
    pub status: OccurrenceStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ClassOccurrence {
    /// Seats can be taken while the class is scheduled or running.
    pub fn accepts_bookings(&self) -> bool {
        matches!(
            self.status,
            OccurrenceStatus::Scheduled | OccurrenceStatus::InProgress
        )
    }

    /// Promotion trigger (b) only fires while the class has not started.
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.status == OccurrenceStatus::Scheduled && now < self.starts_at
    }
}
