use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::database::Database;
use crate::errors::BookingError;
use crate::models::Seat;
use crate::store::BookingStore;

/// External studio layout: the fixed set of physical seats per studio.
/// Consumed once per occurrence, when its assignment rows are created.
/// Layout generation itself lives elsewhere.
#[async_trait]
pub trait SeatLayoutProvider: Send + Sync {
    async fn list_seats(&self, studio_id: i64) -> Result<Vec<Seat>, BookingError>;
}

#[derive(Clone)]
pub struct PgSeatLayout {
    db: Database,
}

impl PgSeatLayout {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SeatLayoutProvider for PgSeatLayout {
    async fn list_seats(&self, studio_id: i64) -> Result<Vec<Seat>, BookingError> {
        let seats = sqlx::query_as::<_, Seat>(
            "SELECT id, studio_id, \"row\", number FROM seats \
             WHERE studio_id = $1 \
             ORDER BY \"row\", number",
        )
        .bind(studio_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(seats)
    }
}

/// Creates the `available` assignment rows for a freshly scheduled
/// occurrence. An explicit step in the scheduling workflow; nothing happens
/// as a side effect of constructing the occurrence itself.
pub async fn provision_seats(
    store: &Arc<dyn BookingStore>,
    layout: &Arc<dyn SeatLayoutProvider>,
    occurrence_id: i64,
    studio_id: i64,
    capacity: i32,
) -> Result<usize, BookingError> {
    let mut seats = layout.list_seats(studio_id).await?;
    if capacity > 0 && (capacity as usize) < seats.len() {
        seats.truncate(capacity as usize);
    }

    let seat_ids: Vec<i64> = seats.iter().map(|s| s.id).collect();
    let created = store.insert_assignments(occurrence_id, &seat_ids).await?;
    info!(
        "provisioned {} seat assignments for occurrence {} (studio {})",
        created, occurrence_id, studio_id
    );
    Ok(created)
}
