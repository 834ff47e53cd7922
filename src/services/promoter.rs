use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info};

use super::notifier::{NotificationEvent, NotificationSender};
use super::reservation::ReservationEngine;
use crate::clock::Clock;
use crate::errors::BookingError;
use crate::models::{OccurrenceStatus, WaitingListEntry, WaitingStatus};
use crate::store::BookingStore;

/// Moves queued users into freed seats, oldest entry first. Runs when an
/// occurrence starts and whenever a seat comes back while the class is
/// still upcoming. Credit is consumed at promotion time through the same
/// reserve path as a direct booking.
#[derive(Clone)]
pub struct WaitingListPromoter {
    store: Arc<dyn BookingStore>,
    engine: ReservationEngine,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSender>,
    ttl_minutes: i64,
}

impl WaitingListPromoter {
    pub fn new(
        store: Arc<dyn BookingStore>,
        engine: ReservationEngine,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSender>,
        ttl_minutes: i64,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            notifier,
            ttl_minutes,
        }
    }

    /// Flips due occurrences `scheduled -> in_progress` and runs a
    /// promotion sweep over each. The status swap makes overlapping runs
    /// start an occurrence exactly once.
    pub async fn start_due_occurrences(&self) -> Result<usize, BookingError> {
        let now = self.clock.now();
        let due = self.store.occurrences_due_to_start(now).await?;
        let mut started = 0;

        for occurrence in due {
            let flipped = match self
                .store
                .transition_occurrence(
                    occurrence.id,
                    OccurrenceStatus::Scheduled,
                    OccurrenceStatus::InProgress,
                )
                .await
            {
                Ok(flipped) => flipped,
                Err(e) => {
                    error!(
                        "failed to start occurrence {}: {} (continuing)",
                        occurrence.id, e
                    );
                    continue;
                }
            };
            if !flipped {
                continue;
            }
            started += 1;
            info!("occurrence {} started", occurrence.id);

            if let Err(e) = self.promote_waiting_list(occurrence.id).await {
                error!(
                    "promotion sweep failed for occurrence {}: {}",
                    occurrence.id, e
                );
            }
        }
        Ok(started)
    }

    /// One promotion sweep: pop waiting entries FIFO and hand each one a
    /// free seat until seats or entries run out. Returns how many entries
    /// were confirmed.
    pub async fn promote_waiting_list(&self, occurrence_id: i64) -> Result<usize, BookingError> {
        let occurrence = self
            .store
            .occurrence(occurrence_id)
            .await?
            .ok_or(BookingError::not_found("occurrence", occurrence_id))?;
        if !occurrence.accepts_bookings() {
            return Ok(0);
        }

        let mut seats: VecDeque<i64> = self
            .store
            .available_assignments(occurrence_id)
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();
        if seats.is_empty() {
            return Ok(0);
        }

        let entries = self.store.waiting_entries(occurrence_id).await?;
        let mut promoted = 0;

        'entries: for entry in entries {
            loop {
                let Some(assignment_id) = seats.pop_front() else {
                    break 'entries;
                };
                match self
                    .engine
                    .reserve_from_waiting_list(
                        assignment_id,
                        entry.user_id,
                        self.ttl_minutes,
                        entry.preselected_credit(),
                    )
                    .await
                {
                    Ok(reservation) => {
                        if self.claim_entry(&entry).await? {
                            promoted += 1;
                            info!(
                                "🎫 promoted waiting entry {}: user={} assignment={} occurrence={}",
                                entry.id, entry.user_id, reservation.id, occurrence_id
                            );
                            self.send_promoted(&entry, reservation.id);
                        } else {
                            // An overlapping sweep already promoted this
                            // entry; undo our duplicate reservation.
                            if let Err(e) = self.engine.release(reservation.id).await {
                                error!(
                                    "failed to roll back duplicate promotion on assignment {}: {}",
                                    reservation.id, e
                                );
                            } else {
                                seats.push_back(reservation.id);
                            }
                        }
                        continue 'entries;
                    }
                    // The seat raced away; try the next free one.
                    Err(BookingError::SeatNotAvailable) => continue,
                    Err(
                        BookingError::NoEligibleCredit { .. }
                        | BookingError::InsufficientCredit(_)
                        | BookingError::GrantNotActive(_),
                    ) => {
                        // The user's credit situation changed while queued;
                        // they can no longer be promoted.
                        self.store
                            .transition_waiting_entry(
                                entry.id,
                                WaitingStatus::Waiting,
                                WaitingStatus::Expired,
                            )
                            .await?;
                        info!(
                            "waiting entry {} expired: user {} has no usable credit",
                            entry.id, entry.user_id
                        );
                        seats.push_front(assignment_id);
                        continue 'entries;
                    }
                    Err(e) => {
                        error!(
                            "promotion failed for entry {} on assignment {}: {} (continuing)",
                            entry.id, assignment_id, e
                        );
                        seats.push_front(assignment_id);
                        continue 'entries;
                    }
                }
            }
        }

        Ok(promoted)
    }

    async fn claim_entry(&self, entry: &WaitingListEntry) -> Result<bool, BookingError> {
        self.store
            .transition_waiting_entry(entry.id, WaitingStatus::Waiting, WaitingStatus::Confirmed)
            .await
    }

    fn send_promoted(&self, entry: &WaitingListEntry, assignment_id: i64) {
        let notifier = Arc::clone(&self.notifier);
        let user_id = entry.user_id;
        let occurrence_id = entry.occurrence_id;
        tokio::spawn(async move {
            notifier
                .notify(
                    user_id,
                    NotificationEvent::WaitingListPromoted,
                    json!({
                        "assignment_id": assignment_id,
                        "occurrence_id": occurrence_id,
                    }),
                )
                .await;
        });
    }
}
