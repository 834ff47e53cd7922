//! reservation.rs
//!
//! The seat state machine. Every operation here is one guarded
//! compare-and-swap on the seat assignment row plus at most one credit
//! mutation, composed so the pair is all-or-nothing:
//!
//! 1. the credit is debited first,
//! 2. then the seat transition runs,
//! 3. a lost seat race refunds the credit immediately.
//!
//! Concurrent reserves on the same seat are arbitrated only by the row-level
//! swap: exactly one wins, the rest observe `SeatNotAvailable` and never
//! retry. Notifications go out after the state change, never inside it.

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::ledger::CreditLedger;
use super::notifier::{NotificationEvent, NotificationSender};
use super::policy;
use crate::clock::Clock;
use crate::errors::BookingError;
use crate::models::{
    AssignmentPatch, GrantRef, SeatAction, SeatAssignment, SeatStatus,
};
use crate::store::BookingStore;

#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn BookingStore>,
    ledger: CreditLedger,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSender>,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn BookingStore>,
        ledger: CreditLedger,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            notifier,
        }
    }

    /// Reserve one seat for a user, consuming one credit chosen by the
    /// selection policy. Holds the seat for `ttl_minutes` before the
    /// sweeper may reclaim it.
    pub async fn reserve(
        &self,
        assignment_id: i64,
        user_id: i64,
        ttl_minutes: i64,
    ) -> Result<SeatAssignment, BookingError> {
        self.reserve_inner(assignment_id, user_id, ttl_minutes, None, None, false)
            .await
    }

    /// Reservation path used by the waiting-list promoter: a pre-selected
    /// credit source is tried first, the policy takes over if it fails.
    /// `waiting_user_id` is set on the row while the promoted reservation
    /// awaits the user's confirmation.
    pub async fn reserve_from_waiting_list(
        &self,
        assignment_id: i64,
        user_id: i64,
        ttl_minutes: i64,
        preselected: Option<GrantRef>,
    ) -> Result<SeatAssignment, BookingError> {
        self.reserve_inner(assignment_id, user_id, ttl_minutes, preselected, None, true)
            .await
    }

    /// Batch reserve: independent per seat, best effort. One seat losing its
    /// race does not undo the others; the caller gets a result per seat.
    pub async fn reserve_seats(
        &self,
        occurrence_id: i64,
        assignment_ids: &[i64],
        user_id: i64,
        ttl_minutes: i64,
    ) -> Vec<(i64, Result<SeatAssignment, BookingError>)> {
        let tasks = assignment_ids.iter().map(|&assignment_id| async move {
            let result = self
                .reserve_inner(
                    assignment_id,
                    user_id,
                    ttl_minutes,
                    None,
                    Some(occurrence_id),
                    false,
                )
                .await;
            (assignment_id, result)
        });
        futures::future::join_all(tasks).await
    }

    async fn reserve_inner(
        &self,
        assignment_id: i64,
        user_id: i64,
        ttl_minutes: i64,
        preselected: Option<GrantRef>,
        expected_occurrence: Option<i64>,
        from_waiting_list: bool,
    ) -> Result<SeatAssignment, BookingError> {
        let assignment = self.load(assignment_id).await?;
        if let Some(occurrence_id) = expected_occurrence {
            if assignment.occurrence_id != occurrence_id {
                return Err(BookingError::not_found("seat assignment", assignment_id));
            }
        }
        if assignment.status != SeatStatus::Available {
            return Err(BookingError::SeatNotAvailable);
        }

        let occurrence = self
            .store
            .occurrence(assignment.occurrence_id)
            .await?
            .ok_or(BookingError::not_found(
                "occurrence",
                assignment.occurrence_id,
            ))?;
        if !occurrence.accepts_bookings() {
            return Err(BookingError::OccurrenceNotBookable(occurrence.id));
        }

        let now = self.clock.now();
        let credit = self
            .consume_credit(user_id, occurrence.discipline_id, preselected, now)
            .await?;

        let patch = AssignmentPatch {
            holder_user_id: Some(user_id),
            waiting_user_id: from_waiting_list.then_some(user_id),
            consumed_credit: Some(credit),
            reserved_at: Some(now),
            expires_at: Some(now + Duration::minutes(ttl_minutes)),
        };
        let won = self
            .store
            .transition_assignment(
                assignment_id,
                SeatStatus::Available,
                None,
                SeatStatus::Reserved,
                patch,
            )
            .await?;
        if !won {
            // Someone else got the row between our read and the swap. The
            // debit must not stick: credit back and report the lost race.
            self.ledger.credit(credit).await?;
            return Err(BookingError::SeatNotAvailable);
        }

        info!(
            "seat reserved: assignment={} occurrence={} user={} credit={}",
            assignment_id, occurrence.id, user_id, credit
        );
        self.send(
            user_id,
            NotificationEvent::SeatReserved,
            json!({
                "assignment_id": assignment_id,
                "occurrence_id": occurrence.id,
                "expires_at": patch.expires_at,
            }),
        );

        Ok(SeatAssignment {
            status: SeatStatus::Reserved,
            holder_user_id: patch.holder_user_id,
            waiting_user_id: patch.waiting_user_id,
            consumed_credit_kind: Some(credit.kind()),
            consumed_credit_id: Some(credit.id()),
            reserved_at: patch.reserved_at,
            expires_at: patch.expires_at,
            ..assignment
        })
    }

    /// Debit one credit for the user, re-running the selection once if a
    /// concurrent consumption wins the first debit. Seat races are never
    /// retried, credit races are retried exactly once.
    async fn consume_credit(
        &self,
        user_id: i64,
        discipline_id: i64,
        preselected: Option<GrantRef>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<GrantRef, BookingError> {
        if let Some(grant) = preselected {
            match self.ledger.debit(grant, now).await {
                Ok(()) => return Ok(grant),
                Err(
                    BookingError::InsufficientCredit(_)
                    | BookingError::GrantNotActive(_)
                    | BookingError::NotFound { .. },
                ) => {
                    // The pre-selected grant died while the user waited in
                    // the queue; fall through to a fresh selection.
                }
                Err(e) => return Err(e),
            }
        }

        let mut attempts = 0;
        loop {
            let eligible = self
                .ledger
                .eligible_grants(user_id, discipline_id, now)
                .await?;
            let Some(grant) = policy::select_credit(&eligible) else {
                return Err(BookingError::NoEligibleCredit {
                    user_id,
                    discipline_id,
                });
            };
            match self.ledger.debit(grant, now).await {
                Ok(()) => return Ok(grant),
                Err(
                    e @ (BookingError::InsufficientCredit(_) | BookingError::GrantNotActive(_)),
                ) => {
                    attempts += 1;
                    if attempts >= 2 {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `reserved -> occupied`. The credit already moved at reserve time.
    pub async fn confirm(&self, assignment_id: i64) -> Result<SeatAssignment, BookingError> {
        let assignment = self.load(assignment_id).await?;
        let next = assignment.status.apply(SeatAction::Confirm)?;

        // A pending promotion is settled by the confirmation.
        let patch = AssignmentPatch {
            holder_user_id: assignment.holder_user_id,
            waiting_user_id: None,
            consumed_credit: assignment.consumed_credit(),
            reserved_at: assignment.reserved_at,
            expires_at: None,
        };
        let won = self
            .store
            .transition_assignment(assignment_id, SeatStatus::Reserved, None, next, patch)
            .await?;
        if !won {
            return Err(self.stale(assignment_id, SeatAction::Confirm).await);
        }

        if let Some(user_id) = assignment.holder_user_id {
            self.send(
                user_id,
                NotificationEvent::ReservationConfirmed,
                json!({
                    "assignment_id": assignment_id,
                    "occurrence_id": assignment.occurrence_id,
                }),
            );
        }

        Ok(SeatAssignment {
            status: next,
            waiting_user_id: None,
            expires_at: None,
            ..assignment
        })
    }

    /// `reserved|occupied -> available`, refunding the consumed credit. The
    /// single rollback path: user cancellation and the expiration sweeper
    /// both end up here.
    pub async fn release(&self, assignment_id: i64) -> Result<SeatAssignment, BookingError> {
        let assignment = self.load(assignment_id).await?;
        assignment.status.apply(SeatAction::Release)?;

        let credit = assignment.consumed_credit();
        let won = self
            .store
            .transition_assignment(
                assignment_id,
                assignment.status,
                None,
                SeatStatus::Available,
                AssignmentPatch::default(),
            )
            .await?;
        if !won {
            return Err(self.stale(assignment_id, SeatAction::Release).await);
        }

        if let Some(grant) = credit {
            self.ledger.credit(grant).await?;
        }
        info!(
            "seat released: assignment={} occurrence={} user={:?} refunded={:?}",
            assignment_id,
            assignment.occurrence_id,
            assignment.holder_user_id,
            credit.map(|c| c.to_string())
        );

        Ok(SeatAssignment {
            status: SeatStatus::Available,
            holder_user_id: None,
            waiting_user_id: None,
            consumed_credit_kind: None,
            consumed_credit_id: None,
            reserved_at: None,
            expires_at: None,
            ..assignment
        })
    }

    /// Attendance confirmation: `occupied -> completed`. Terminal, no
    /// credit movement.
    pub async fn complete(&self, assignment_id: i64) -> Result<SeatAssignment, BookingError> {
        let assignment = self.load(assignment_id).await?;
        let next = assignment.status.apply(SeatAction::Complete)?;

        let patch = AssignmentPatch {
            holder_user_id: assignment.holder_user_id,
            waiting_user_id: assignment.waiting_user_id,
            consumed_credit: assignment.consumed_credit(),
            reserved_at: assignment.reserved_at,
            expires_at: None,
        };
        let won = self
            .store
            .transition_assignment(assignment_id, SeatStatus::Occupied, None, next, patch)
            .await?;
        if !won {
            return Err(self.stale(assignment_id, SeatAction::Complete).await);
        }
        Ok(SeatAssignment {
            status: next,
            expires_at: None,
            ..assignment
        })
    }

    /// Administrative removal from the pool. Blocking a held seat refunds
    /// the credit exactly as `release` does: the holder loses the seat
    /// involuntarily.
    pub async fn block(&self, assignment_id: i64) -> Result<SeatAssignment, BookingError> {
        let assignment = self.load(assignment_id).await?;
        assignment.status.apply(SeatAction::Block)?;

        let credit = assignment.consumed_credit();
        let won = self
            .store
            .transition_assignment(
                assignment_id,
                assignment.status,
                None,
                SeatStatus::Blocked,
                AssignmentPatch::default(),
            )
            .await?;
        if !won {
            return Err(self.stale(assignment_id, SeatAction::Block).await);
        }

        if let Some(grant) = credit {
            self.ledger.credit(grant).await?;
            warn!(
                "blocked a held seat: assignment={} previous_holder={:?} refunded={}",
                assignment_id, assignment.holder_user_id, grant
            );
            if let Some(user_id) = assignment.holder_user_id {
                self.send(
                    user_id,
                    NotificationEvent::SeatRevoked,
                    json!({
                        "assignment_id": assignment_id,
                        "occurrence_id": assignment.occurrence_id,
                    }),
                );
            }
        }

        Ok(SeatAssignment {
            status: SeatStatus::Blocked,
            holder_user_id: None,
            waiting_user_id: None,
            consumed_credit_kind: None,
            consumed_credit_id: None,
            reserved_at: None,
            expires_at: None,
            ..assignment
        })
    }

    /// `blocked -> available`; the only way back into the pool.
    pub async fn unblock(&self, assignment_id: i64) -> Result<SeatAssignment, BookingError> {
        let assignment = self.load(assignment_id).await?;
        let next = assignment.status.apply(SeatAction::Unblock)?;

        let won = self
            .store
            .transition_assignment(
                assignment_id,
                SeatStatus::Blocked,
                None,
                next,
                AssignmentPatch::default(),
            )
            .await?;
        if !won {
            return Err(self.stale(assignment_id, SeatAction::Unblock).await);
        }
        Ok(SeatAssignment {
            status: next,
            ..assignment
        })
    }

    async fn load(&self, assignment_id: i64) -> Result<SeatAssignment, BookingError> {
        self.store
            .assignment(assignment_id)
            .await?
            .ok_or(BookingError::not_found("seat assignment", assignment_id))
    }

    /// The swap lost against a concurrent change: report the transition as
    /// invalid against the state the row is really in now.
    async fn stale(&self, assignment_id: i64, action: SeatAction) -> BookingError {
        match self.store.assignment(assignment_id).await {
            Ok(Some(fresh)) => BookingError::InvalidTransition {
                from: fresh.status,
                action,
            },
            Ok(None) => BookingError::not_found("seat assignment", assignment_id),
            Err(e) => e,
        }
    }

    fn send(&self, user_id: i64, event: NotificationEvent, payload: serde_json::Value) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(user_id, event, payload).await;
        });
    }
}
