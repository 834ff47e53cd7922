use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{BookingStore, NewOccurrence, NewWaitingEntry};
use crate::errors::BookingError;
use crate::models::{
    AssignmentPatch, ClassOccurrence, Grant, GrantRef, MembershipGrant, OccurrenceStatus,
    PackageGrant, SeatAssignment, SeatStatus, WaitingListEntry, WaitingStatus,
};

#[derive(Default)]
struct Inner {
    occurrences: BTreeMap<i64, ClassOccurrence>,
    assignments: BTreeMap<i64, SeatAssignment>,
    packages: BTreeMap<i64, PackageGrant>,
    memberships: BTreeMap<i64, MembershipGrant>,
    waiting: BTreeMap<i64, WaitingListEntry>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process backend. A single mutex keeps every compare-and-swap check
/// and its write inside one critical section, which gives the same
/// arbitration semantics as the guarded UPDATEs of the Postgres backend.
/// Backs the test suite and local development without external services.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- seeding helpers (fixtures and local dev, not part of the trait) ---

    pub async fn seed_occurrence(&self, mut occ: ClassOccurrence) -> i64 {
        let mut inner = self.inner.lock().await;
        occ.id = inner.next_id();
        let id = occ.id;
        inner.occurrences.insert(id, occ);
        id
    }

    pub async fn seed_assignment(&self, occurrence_id: i64, seat_id: i64) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.assignments.insert(
            id,
            SeatAssignment {
                id,
                occurrence_id,
                seat_id,
                status: SeatStatus::Available,
                holder_user_id: None,
                waiting_user_id: None,
                consumed_credit_kind: None,
                consumed_credit_id: None,
                reserved_at: None,
                expires_at: None,
            },
        );
        id
    }

    pub async fn seed_package_grant(&self, mut grant: PackageGrant) -> i64 {
        let mut inner = self.inner.lock().await;
        grant.id = inner.next_id();
        let id = grant.id;
        inner.packages.insert(id, grant);
        id
    }

    pub async fn seed_membership_grant(&self, mut grant: MembershipGrant) -> i64 {
        let mut inner = self.inner.lock().await;
        grant.id = inner.next_id();
        let id = grant.id;
        inner.memberships.insert(id, grant);
        id
    }

    pub async fn package_grant(&self, id: i64) -> Option<PackageGrant> {
        self.inner.lock().await.packages.get(&id).cloned()
    }

    pub async fn membership_grant(&self, id: i64) -> Option<MembershipGrant> {
        self.inner.lock().await.memberships.get(&id).cloned()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn occurrence(&self, id: i64) -> Result<Option<ClassOccurrence>, BookingError> {
        Ok(self.inner.lock().await.occurrences.get(&id).cloned())
    }

    async fn upcoming_occurrences(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClassOccurrence>, BookingError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<_> = inner
            .occurrences
            .values()
            .filter(|o| o.starts_at > now && o.status == OccurrenceStatus::Scheduled)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.starts_at);
        Ok(out)
    }

    async fn occurrences_due_to_start(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClassOccurrence>, BookingError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<_> = inner
            .occurrences
            .values()
            .filter(|o| o.status == OccurrenceStatus::Scheduled && o.starts_at <= now)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.starts_at);
        Ok(out)
    }

    async fn insert_occurrence(
        &self,
        new: NewOccurrence,
        now: DateTime<Utc>,
    ) -> Result<i64, BookingError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.occurrences.insert(
            id,
            ClassOccurrence {
                id,
                discipline_id: new.discipline_id,
                studio_id: new.studio_id,
                capacity: new.capacity,
                status: OccurrenceStatus::Scheduled,
                starts_at: new.starts_at,
                ends_at: new.ends_at,
                created_at: now,
            },
        );
        Ok(id)
    }

    async fn transition_occurrence(
        &self,
        id: i64,
        expected: OccurrenceStatus,
        to: OccurrenceStatus,
    ) -> Result<bool, BookingError> {
        let mut inner = self.inner.lock().await;
        match inner.occurrences.get_mut(&id) {
            Some(occ) if occ.status == expected => {
                occ.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(BookingError::not_found("occurrence", id)),
        }
    }

    async fn assignment(&self, id: i64) -> Result<Option<SeatAssignment>, BookingError> {
        Ok(self.inner.lock().await.assignments.get(&id).cloned())
    }

    async fn assignments_by_occurrence(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .assignments
            .values()
            .filter(|a| a.occurrence_id == occurrence_id)
            .cloned()
            .collect())
    }

    async fn assignments_by_holder(
        &self,
        user_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .assignments
            .values()
            .filter(|a| a.holder_user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn available_assignments(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .assignments
            .values()
            .filter(|a| a.occurrence_id == occurrence_id && a.status == SeatStatus::Available)
            .cloned()
            .collect())
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatAssignment>, BookingError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .assignments
            .values()
            .filter(|a| {
                a.status == SeatStatus::Reserved
                    && a.expires_at.map(|e| e < now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn insert_assignments(
        &self,
        occurrence_id: i64,
        seat_ids: &[i64],
    ) -> Result<usize, BookingError> {
        let mut inner = self.inner.lock().await;
        for seat_id in seat_ids {
            let id = inner.next_id();
            inner.assignments.insert(
                id,
                SeatAssignment {
                    id,
                    occurrence_id,
                    seat_id: *seat_id,
                    status: SeatStatus::Available,
                    holder_user_id: None,
                    waiting_user_id: None,
                    consumed_credit_kind: None,
                    consumed_credit_id: None,
                    reserved_at: None,
                    expires_at: None,
                },
            );
        }
        Ok(seat_ids.len())
    }

    async fn transition_assignment(
        &self,
        id: i64,
        expected: SeatStatus,
        expires_before: Option<DateTime<Utc>>,
        new_status: SeatStatus,
        patch: AssignmentPatch,
    ) -> Result<bool, BookingError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .assignments
            .get_mut(&id)
            .ok_or(BookingError::not_found("seat assignment", id))?;

        if row.status != expected {
            return Ok(false);
        }
        if let Some(deadline) = expires_before {
            // Sweeper guard: only fire while the reservation has really lapsed.
            match row.expires_at {
                Some(expiry) if expiry < deadline => {}
                _ => return Ok(false),
            }
        }

        row.status = new_status;
        row.holder_user_id = patch.holder_user_id;
        row.waiting_user_id = patch.waiting_user_id;
        row.consumed_credit_kind = patch.consumed_credit.map(|c| c.kind());
        row.consumed_credit_id = patch.consumed_credit.map(|c| c.id());
        row.reserved_at = patch.reserved_at;
        row.expires_at = patch.expires_at;
        Ok(true)
    }

    async fn grants_for_user(&self, user_id: i64) -> Result<Vec<Grant>, BookingError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Grant> = inner
            .packages
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .map(Grant::Package)
            .chain(
                inner
                    .memberships
                    .values()
                    .filter(|g| g.user_id == user_id)
                    .cloned()
                    .map(Grant::Membership),
            )
            .collect();
        out.sort_by_key(|g| (g.created_at(), g.grant_ref().id()));
        Ok(out)
    }

    async fn debit_grant(
        &self,
        grant: GrantRef,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        let mut inner = self.inner.lock().await;
        match grant {
            GrantRef::Package(id) => inner
                .packages
                .get_mut(&id)
                .ok_or(BookingError::not_found("package grant", id))?
                .debit(now),
            GrantRef::Membership(id) => inner
                .memberships
                .get_mut(&id)
                .ok_or(BookingError::not_found("membership grant", id))?
                .debit(now),
        }
    }

    async fn credit_grant(&self, grant: GrantRef) -> Result<(), BookingError> {
        let mut inner = self.inner.lock().await;
        match grant {
            GrantRef::Package(id) => inner
                .packages
                .get_mut(&id)
                .ok_or(BookingError::not_found("package grant", id))?
                .credit(),
            GrantRef::Membership(id) => inner
                .memberships
                .get_mut(&id)
                .ok_or(BookingError::not_found("membership grant", id))?
                .credit(),
        }
    }

    async fn insert_waiting_entry(
        &self,
        new: NewWaitingEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, BookingError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.waiting.insert(
            id,
            WaitingListEntry {
                id,
                occurrence_id: new.occurrence_id,
                user_id: new.user_id,
                status: WaitingStatus::Waiting,
                preselected_credit_kind: new.preselected_credit.map(|c| c.kind()),
                preselected_credit_id: new.preselected_credit.map(|c| c.id()),
                created_at: now,
            },
        );
        Ok(id)
    }

    async fn waiting_entry(&self, id: i64) -> Result<Option<WaitingListEntry>, BookingError> {
        Ok(self.inner.lock().await.waiting.get(&id).cloned())
    }

    async fn waiting_entries(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<WaitingListEntry>, BookingError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<_> = inner
            .waiting
            .values()
            .filter(|e| e.occurrence_id == occurrence_id && e.status == WaitingStatus::Waiting)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.created_at, e.id));
        Ok(out)
    }

    async fn transition_waiting_entry(
        &self,
        id: i64,
        expected: WaitingStatus,
        to: WaitingStatus,
    ) -> Result<bool, BookingError> {
        let mut inner = self.inner.lock().await;
        match inner.waiting.get_mut(&id) {
            Some(entry) if entry.status == expected => {
                entry.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(BookingError::not_found("waiting list entry", id)),
        }
    }
}
