use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{BookingStore, NewOccurrence, NewWaitingEntry};
use crate::database::Database;
use crate::errors::BookingError;
use crate::models::{
    AssignmentPatch, ClassOccurrence, Grant, GrantRef, MembershipGrant, OccurrenceStatus,
    PackageGrant, SeatAssignment, SeatStatus, WaitingListEntry, WaitingStatus,
};

const ASSIGNMENT_COLUMNS: &str = "id, occurrence_id, seat_id, status, holder_user_id, \
     waiting_user_id, consumed_credit_kind, consumed_credit_id, reserved_at, expires_at";

const OCCURRENCE_COLUMNS: &str =
    "id, discipline_id, studio_id, capacity, status, starts_at, ends_at, created_at";

const WAITING_COLUMNS: &str = "id, occurrence_id, user_id, status, \
     preselected_credit_kind, preselected_credit_id, created_at";

/// Postgres backend. Every mutation is a single guarded UPDATE; the number
/// of affected rows is the compare-and-swap verdict, so no transaction ever
/// spans an external call.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn diagnose_debit_failure(
        &self,
        grant: GrantRef,
        now: DateTime<Utc>,
    ) -> BookingError {
        // The guarded UPDATE matched nothing; re-read to tell the caller why.
        let found = match grant {
            GrantRef::Package(id) => sqlx::query_as::<_, PackageGrant>(
                "SELECT * FROM package_grants WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await
            .map(|g| g.map(Grant::Package)),
            GrantRef::Membership(id) => sqlx::query_as::<_, MembershipGrant>(
                "SELECT * FROM membership_grants WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await
            .map(|g| g.map(Grant::Membership)),
        };

        match found {
            Ok(None) => BookingError::not_found("grant", grant.id()),
            Ok(Some(g)) if !g.is_active(now) => BookingError::GrantNotActive(grant),
            Ok(Some(_)) => BookingError::InsufficientCredit(grant),
            Err(e) => BookingError::Storage(e),
        }
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn occurrence(&self, id: i64) -> Result<Option<ClassOccurrence>, BookingError> {
        let row = sqlx::query_as::<_, ClassOccurrence>(&format!(
            "SELECT {} FROM class_occurrences WHERE id = $1",
            OCCURRENCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    async fn upcoming_occurrences(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClassOccurrence>, BookingError> {
        let rows = sqlx::query_as::<_, ClassOccurrence>(&format!(
            "SELECT {} FROM class_occurrences \
             WHERE status = $1 AND starts_at > $2 \
             ORDER BY starts_at",
            OCCURRENCE_COLUMNS
        ))
        .bind(OccurrenceStatus::Scheduled)
        .bind(now)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn occurrences_due_to_start(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClassOccurrence>, BookingError> {
        let rows = sqlx::query_as::<_, ClassOccurrence>(&format!(
            "SELECT {} FROM class_occurrences \
             WHERE status = $1 AND starts_at <= $2 \
             ORDER BY starts_at",
            OCCURRENCE_COLUMNS
        ))
        .bind(OccurrenceStatus::Scheduled)
        .bind(now)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_occurrence(
        &self,
        new: NewOccurrence,
        now: DateTime<Utc>,
    ) -> Result<i64, BookingError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO class_occurrences \
             (discipline_id, studio_id, capacity, status, starts_at, ends_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id",
        )
        .bind(new.discipline_id)
        .bind(new.studio_id)
        .bind(new.capacity)
        .bind(OccurrenceStatus::Scheduled)
        .bind(new.starts_at)
        .bind(new.ends_at)
        .bind(now)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(id)
    }

    async fn transition_occurrence(
        &self,
        id: i64,
        expected: OccurrenceStatus,
        to: OccurrenceStatus,
    ) -> Result<bool, BookingError> {
        let result = sqlx::query(
            "UPDATE class_occurrences SET status = $1 WHERE id = $2 AND status = $3",
        )
        .bind(to)
        .bind(id)
        .bind(expected)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn assignment(&self, id: i64) -> Result<Option<SeatAssignment>, BookingError> {
        let row = sqlx::query_as::<_, SeatAssignment>(&format!(
            "SELECT {} FROM seat_assignments WHERE id = $1",
            ASSIGNMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    async fn assignments_by_occurrence(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError> {
        let rows = sqlx::query_as::<_, SeatAssignment>(&format!(
            "SELECT {} FROM seat_assignments WHERE occurrence_id = $1 ORDER BY seat_id",
            ASSIGNMENT_COLUMNS
        ))
        .bind(occurrence_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn assignments_by_holder(
        &self,
        user_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError> {
        let rows = sqlx::query_as::<_, SeatAssignment>(&format!(
            "SELECT {} FROM seat_assignments \
             WHERE holder_user_id = $1 AND status IN ($2, $3, $4) \
             ORDER BY id",
            ASSIGNMENT_COLUMNS
        ))
        .bind(user_id)
        .bind(SeatStatus::Reserved)
        .bind(SeatStatus::Occupied)
        .bind(SeatStatus::Completed)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn available_assignments(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<SeatAssignment>, BookingError> {
        let rows = sqlx::query_as::<_, SeatAssignment>(&format!(
            "SELECT {} FROM seat_assignments \
             WHERE occurrence_id = $1 AND status = $2 \
             ORDER BY seat_id",
            ASSIGNMENT_COLUMNS
        ))
        .bind(occurrence_id)
        .bind(SeatStatus::Available)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatAssignment>, BookingError> {
        let rows = sqlx::query_as::<_, SeatAssignment>(&format!(
            "SELECT {} FROM seat_assignments \
             WHERE status = $1 AND expires_at < $2 \
             ORDER BY expires_at",
            ASSIGNMENT_COLUMNS
        ))
        .bind(SeatStatus::Reserved)
        .bind(now)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_assignments(
        &self,
        occurrence_id: i64,
        seat_ids: &[i64],
    ) -> Result<usize, BookingError> {
        let result = sqlx::query(
            "INSERT INTO seat_assignments (occurrence_id, seat_id, status) \
             SELECT $1, seat_id, $2 FROM UNNEST($3::bigint[]) AS t(seat_id)",
        )
        .bind(occurrence_id)
        .bind(SeatStatus::Available)
        .bind(seat_ids)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn transition_assignment(
        &self,
        id: i64,
        expected: SeatStatus,
        expires_before: Option<DateTime<Utc>>,
        new_status: SeatStatus,
        patch: AssignmentPatch,
    ) -> Result<bool, BookingError> {
        let result = sqlx::query(
            "UPDATE seat_assignments \
             SET status = $1, holder_user_id = $2, waiting_user_id = $3, \
                 consumed_credit_kind = $4, consumed_credit_id = $5, \
                 reserved_at = $6, expires_at = $7, updated_at = NOW() \
             WHERE id = $8 AND status = $9 \
               AND ($10::timestamptz IS NULL OR expires_at < $10)",
        )
        .bind(new_status)
        .bind(patch.holder_user_id)
        .bind(patch.waiting_user_id)
        .bind(patch.consumed_credit.map(|c| c.kind()))
        .bind(patch.consumed_credit.map(|c| c.id()))
        .bind(patch.reserved_at)
        .bind(patch.expires_at)
        .bind(id)
        .bind(expected)
        .bind(expires_before)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn grants_for_user(&self, user_id: i64) -> Result<Vec<Grant>, BookingError> {
        let packages = sqlx::query_as::<_, PackageGrant>(
            "SELECT * FROM package_grants WHERE user_id = $1 ORDER BY created_at, id",
        )
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;

        let memberships = sqlx::query_as::<_, MembershipGrant>(
            "SELECT * FROM membership_grants WHERE user_id = $1 ORDER BY created_at, id",
        )
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;

        let mut out: Vec<Grant> = packages
            .into_iter()
            .map(Grant::Package)
            .chain(memberships.into_iter().map(Grant::Membership))
            .collect();
        out.sort_by_key(|g| (g.created_at(), g.grant_ref().id()));
        Ok(out)
    }

    async fn debit_grant(
        &self,
        grant: GrantRef,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        let result = match grant {
            GrantRef::Package(id) => {
                sqlx::query(
                    "UPDATE package_grants \
                     SET used_classes = used_classes + 1, \
                         remaining_classes = remaining_classes - 1, \
                         updated_at = NOW() \
                     WHERE id = $1 AND status = $2 \
                       AND activation_date <= $3 AND expiry_date > $3 \
                       AND remaining_classes >= 1",
                )
                .bind(id)
                .bind(crate::models::GrantStatus::Active)
                .bind(now)
                .execute(&self.db.pool)
                .await?
            }
            GrantRef::Membership(id) => {
                sqlx::query(
                    "UPDATE membership_grants \
                     SET used_free_classes = used_free_classes + 1, \
                         remaining_free_classes = remaining_free_classes - 1, \
                         updated_at = NOW() \
                     WHERE id = $1 AND status = $2 \
                       AND activation_date <= $3 AND expiry_date > $3 \
                       AND remaining_free_classes >= 1",
                )
                .bind(id)
                .bind(crate::models::GrantStatus::Active)
                .bind(now)
                .execute(&self.db.pool)
                .await?
            }
        };

        if result.rows_affected() > 0 {
            Ok(())
        } else {
            Err(self.diagnose_debit_failure(grant, now).await)
        }
    }

    async fn credit_grant(&self, grant: GrantRef) -> Result<(), BookingError> {
        // The used-counter guard rejects refunds of grants that hold no debit.
        let result = match grant {
            GrantRef::Package(id) => {
                sqlx::query(
                    "UPDATE package_grants \
                     SET used_classes = used_classes - 1, \
                         remaining_classes = remaining_classes + 1, \
                         updated_at = NOW() \
                     WHERE id = $1 AND used_classes >= 1",
                )
                .bind(id)
                .execute(&self.db.pool)
                .await?
            }
            GrantRef::Membership(id) => {
                sqlx::query(
                    "UPDATE membership_grants \
                     SET used_free_classes = used_free_classes - 1, \
                         remaining_free_classes = remaining_free_classes + 1, \
                         updated_at = NOW() \
                     WHERE id = $1 AND used_free_classes >= 1",
                )
                .bind(id)
                .execute(&self.db.pool)
                .await?
            }
        };

        if result.rows_affected() > 0 {
            Ok(())
        } else {
            Err(BookingError::RefundMismatch(grant))
        }
    }

    async fn insert_waiting_entry(
        &self,
        new: NewWaitingEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, BookingError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO waiting_list_entries \
             (occurrence_id, user_id, status, preselected_credit_kind, \
              preselected_credit_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(new.occurrence_id)
        .bind(new.user_id)
        .bind(WaitingStatus::Waiting)
        .bind(new.preselected_credit.map(|c| c.kind()))
        .bind(new.preselected_credit.map(|c| c.id()))
        .bind(now)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(id)
    }

    async fn waiting_entry(&self, id: i64) -> Result<Option<WaitingListEntry>, BookingError> {
        let row = sqlx::query_as::<_, WaitingListEntry>(&format!(
            "SELECT {} FROM waiting_list_entries WHERE id = $1",
            WAITING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    async fn waiting_entries(
        &self,
        occurrence_id: i64,
    ) -> Result<Vec<WaitingListEntry>, BookingError> {
        let rows = sqlx::query_as::<_, WaitingListEntry>(&format!(
            "SELECT {} FROM waiting_list_entries \
             WHERE occurrence_id = $1 AND status = $2 \
             ORDER BY created_at, id",
            WAITING_COLUMNS
        ))
        .bind(occurrence_id)
        .bind(WaitingStatus::Waiting)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn transition_waiting_entry(
        &self,
        id: i64,
        expected: WaitingStatus,
        to: WaitingStatus,
    ) -> Result<bool, BookingError> {
        let result = sqlx::query(
            "UPDATE waiting_list_entries SET status = $1 WHERE id = $2 AND status = $3",
        )
        .bind(to)
        .bind(id)
        .bind(expected)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
