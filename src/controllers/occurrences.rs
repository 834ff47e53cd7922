use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::errors::{api_error, BookingError};
use crate::middleware::AdminUser;
use crate::models::{OccurrenceStatus, SeatStatus};
use crate::services::seat_layout::provision_seats;
use crate::store::NewOccurrence;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/occurrences", get(list_occurrences))
        .route("/occurrences", post(schedule_occurrence))
        .route("/occurrences/seats", get(get_seat_map))
        .route("/occurrences/postpone", patch(postpone_occurrence))
        .route("/occurrences/cancel", patch(cancel_occurrence))
}

// GET /api/occurrences
async fn list_occurrences(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let occurrences = state.cache.get_occurrences().await;
    Ok((StatusCode::OK, Json(occurrences)))
}

// GET /api/occurrences/seats?occurrence_id=
#[derive(Debug, Deserialize, Validate)]
struct SeatMapQuery {
    #[validate(range(min = 1))]
    occurrence_id: i64,
}

async fn get_seat_map(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeatMapQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    params
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let assignments = state.cache.get_seat_map(params.occurrence_id).await;
    Ok((StatusCode::OK, Json(assignments)))
}

// POST /api/occurrences
#[derive(Debug, Deserialize, Validate)]
struct ScheduleOccurrenceRequest {
    #[validate(range(min = 1))]
    discipline_id: i64,
    #[validate(range(min = 1))]
    studio_id: i64,
    /// 0 means "every seat the studio has".
    #[validate(range(min = 0, max = 500))]
    capacity: Option<i32>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

// Scheduling populates the assignment rows right here, as an explicit step
// of the workflow; constructing an occurrence never creates seats on its own.
async fn schedule_occurrence(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<ScheduleOccurrenceRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    if req.ends_at <= req.starts_at {
        return Err((
            StatusCode::BAD_REQUEST,
            "ends_at must be after starts_at".to_string(),
        ));
    }

    let now = state.clock.now();
    let capacity = req.capacity.unwrap_or(0);
    let occurrence_id = state
        .store
        .insert_occurrence(
            NewOccurrence {
                discipline_id: req.discipline_id,
                studio_id: req.studio_id,
                capacity,
                starts_at: req.starts_at,
                ends_at: req.ends_at,
            },
            now,
        )
        .await
        .map_err(api_error)?;

    let provisioned = provision_seats(
        &state.store,
        &state.layout,
        occurrence_id,
        req.studio_id,
        capacity,
    )
    .await
    .map_err(api_error)?;

    state.cache.invalidate_occurrences().await;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": occurrence_id,
            "seats_provisioned": provisioned,
        })),
    ))
}

// PATCH /api/occurrences/postpone
#[derive(Debug, Deserialize, Validate)]
struct PostponeOccurrenceRequest {
    #[validate(range(min = 1))]
    occurrence_id: i64,
}

async fn postpone_occurrence(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<PostponeOccurrenceRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let flipped = state
        .store
        .transition_occurrence(
            req.occurrence_id,
            OccurrenceStatus::Scheduled,
            OccurrenceStatus::Postponed,
        )
        .await
        .map_err(api_error)?;
    if !flipped {
        return Err(api_error(BookingError::OccurrenceNotBookable(
            req.occurrence_id,
        )));
    }

    state.cache.invalidate_occurrences().await;
    Ok((StatusCode::OK, Json(serde_json::json!({ "postponed": true }))))
}

// PATCH /api/occurrences/cancel
#[derive(Debug, Deserialize, Validate)]
struct CancelOccurrenceRequest {
    #[validate(range(min = 1))]
    occurrence_id: i64,
}

async fn cancel_occurrence(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<CancelOccurrenceRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    // Cancellable from scheduled or postponed; cancelled is immutable.
    let mut flipped = state
        .store
        .transition_occurrence(
            req.occurrence_id,
            OccurrenceStatus::Scheduled,
            OccurrenceStatus::Cancelled,
        )
        .await
        .map_err(api_error)?;
    if !flipped {
        flipped = state
            .store
            .transition_occurrence(
                req.occurrence_id,
                OccurrenceStatus::Postponed,
                OccurrenceStatus::Cancelled,
            )
            .await
            .map_err(api_error)?;
    }
    if !flipped {
        return Err(api_error(BookingError::OccurrenceNotBookable(
            req.occurrence_id,
        )));
    }

    // Everyone holding a seat gets their credit back.
    let assignments = state
        .store
        .assignments_by_occurrence(req.occurrence_id)
        .await
        .map_err(api_error)?;
    let mut released = 0;
    for assignment in assignments {
        if matches!(assignment.status, SeatStatus::Reserved | SeatStatus::Occupied) {
            match state.engine.release(assignment.id).await {
                Ok(_) => released += 1,
                Err(e) => tracing::error!(
                    "failed to release assignment {} while cancelling occurrence {}: {}",
                    assignment.id,
                    req.occurrence_id,
                    e
                ),
            }
        }
    }

    state.cache.invalidate_occurrences().await;
    state.cache.invalidate_seat_map(req.occurrence_id).await;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "cancelled": true,
            "seats_released": released,
        })),
    ))
}
