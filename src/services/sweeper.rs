use std::sync::Arc;
use tracing::{error, info};

use super::ledger::CreditLedger;
use crate::clock::Clock;
use crate::errors::BookingError;
use crate::models::{AssignmentPatch, SeatAssignment, SeatStatus};
use crate::store::BookingStore;

/// Reclaims reservations whose hold time ran out. Safe to run concurrently
/// with itself: the release swap is guarded on both the `reserved` status
/// and the lapsed expiry, so overlapping runs release each row at most once
/// and a second pass right after the first is a no-op.
#[derive(Clone)]
pub struct ExpirationSweeper {
    store: Arc<dyn BookingStore>,
    ledger: CreditLedger,
    clock: Arc<dyn Clock>,
}

impl ExpirationSweeper {
    pub fn new(
        store: Arc<dyn BookingStore>,
        ledger: CreditLedger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
        }
    }

    /// Releases every lapsed reservation and refunds its credit. Each row is
    /// processed independently; one failure never blocks the rest.
    pub async fn sweep_expired(&self) -> Result<usize, BookingError> {
        let now = self.clock.now();
        let expired = self.store.expired_reservations(now).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        info!("🧹 sweeping {} expired reservations", expired.len());
        let mut released = 0;
        for assignment in expired {
            match self.release_expired(&assignment, now).await {
                Ok(true) => released += 1,
                // Lost the guard: confirmed, released or re-reserved since
                // the scan. Not our row anymore.
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "failed to sweep assignment {}: {} (continuing)",
                        assignment.id, e
                    );
                }
            }
        }

        if released > 0 {
            info!("✅ sweep released {} reservations", released);
        }
        Ok(released)
    }

    async fn release_expired(
        &self,
        assignment: &SeatAssignment,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool, BookingError> {
        let credit = assignment.consumed_credit();
        let won = self
            .store
            .transition_assignment(
                assignment.id,
                SeatStatus::Reserved,
                Some(now),
                SeatStatus::Available,
                AssignmentPatch::default(),
            )
            .await?;
        if !won {
            return Ok(false);
        }

        if let Some(grant) = credit {
            self.ledger.credit(grant).await?;
        }
        // Audit trail: who lost which seat and where the credit went back.
        info!(
            "expired reservation released: assignment={} occurrence={} seat={} user={:?} refunded={:?}",
            assignment.id,
            assignment.occurrence_id,
            assignment.seat_id,
            assignment.holder_user_id,
            credit.map(|c| c.to_string()),
        );
        Ok(true)
    }
}
