use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::BookingError;
use crate::models::{
    AssignmentPatch, ClassOccurrence, Grant, GrantRef, OccurrenceStatus, SeatAssignment,
    SeatStatus, WaitingListEntry, WaitingStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone)]
pub struct NewOccurrence {
    pub discipline_id: i64,
    pub studio_id: i64,
    pub capacity: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWaitingEntry {
    pub occurrence_id: i64,
    pub user_id: i64,
    pub preselected_credit: Option<GrantRef>,
}

/// Storage contract of the booking engine. Both backends expose the same
/// compare-and-swap primitives; either a mutation applies against the
/// expected state or it reports `false` and nothing changed.
#[async_trait]
pub trait BookingStore: Send + Sync {
    // --- class occurrences ---

    async fn occurrence(&self, id: i64) -> Result<Option<ClassOccurrence>, BookingError>;

    async fn upcoming_occurrences(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClassOccurrence>, BookingError>;

    /// Scheduled occurrences whose start time has passed.
    async fn occurrences_due_to_start(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClassOccurrence>, BookingError>;

    async fn insert_occurrence(
        &self,
        new: NewOccurrence,
        now: DateTime<Utc>,
    ) -> Result<i64, BookingError>;

    async fn transition_occurrence(
        &self,
        id: i64,
        expected: OccurrenceStatus,
        to: OccurrenceStatus,
    ) -> Result<bool, BookingError>;

    // --- seat assignments ---

    async fn assignment(&self, id: i64) -> Result<Option<SeatAssignment>, BookingError>;

    async fn assignments_by_occurrence(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError>;

    async fn assignments_by_holder(
        &self,
        user_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError>;

    async fn available_assignments(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError>;

    /// Reservations whose `expires_at` lies strictly before `now`.
    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatAssignment>, BookingError>;

    /// One `available` row per seat, created when an occurrence is scheduled.
    async fn insert_assignments(
        &self,
        occurrence_id: i64,
        seat_ids: &[i64],
    ) -> Result<usize, BookingError>;

    /// The single arbitration primitive: atomically replace status and the
    /// mutable columns, but only while the row still matches `expected`
    /// (and, when `expires_before` is given, only while the reservation has
    /// really lapsed). Returns `false` when the guard fails; the caller
    /// decides whether that is a race, staleness, or a no-op.
    async fn transition_assignment(
        &self,
        id: i64,
        expected: SeatStatus,
        expires_before: Option<DateTime<Utc>>,
        new_status: SeatStatus,
        patch: AssignmentPatch,
    ) -> Result<bool, BookingError>;

    // --- grants ---

    async fn grants_for_user(&self, user_id: i64) -> Result<Vec<Grant>, BookingError>;

    /// Atomic consume. Activity window and balance are re-checked inside the
    /// guarded update, closing the race between selection and debit.
    async fn debit_grant(&self, grant: GrantRef, now: DateTime<Utc>)
        -> Result<(), BookingError>;

    /// Atomic refund; rejects refunding a grant that holds no debit.
    async fn credit_grant(&self, grant: GrantRef) -> Result<(), BookingError>;

    // --- waiting list ---

    async fn insert_waiting_entry(
        &self,
        new: NewWaitingEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, BookingError>;

    async fn waiting_entry(&self, id: i64) -> Result<Option<WaitingListEntry>, BookingError>;

    /// Entries still in `waiting`, FIFO by creation time.
    async fn waiting_entries(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<WaitingListEntry>, BookingError>;

    async fn transition_waiting_entry(
        &self,
        id: i64,
        expected: WaitingStatus,
        to: WaitingStatus,
    ) -> Result<bool, BookingError>;
}
