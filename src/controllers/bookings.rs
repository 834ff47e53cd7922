use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::errors::{api_error, BookingError};
use crate::models::{GrantRef, SeatAssignment, WaitingStatus};
use crate::store::NewWaitingEntry;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/seats/reserve", post(reserve_seats))
        .route("/seats/confirm", patch(confirm_seat))
        .route("/seats/release", patch(release_seat))
        .route("/bookings", get(get_my_bookings))
        .route("/grants", get(get_my_grants))
        .route("/waitlist", post(join_waiting_list))
        .route("/waitlist/cancel", patch(cancel_waiting_entry))
}

/* ---------- helpers ---------- */

fn bad_request(e: validator::ValidationErrors) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

/// Confirm/release may only be driven by the seat holder (or staff).
async fn owned_assignment(
    state: &Arc<AppState>,
    assignment_id: i64,
    user: &crate::middleware::AuthUser,
) -> Result<SeatAssignment, (StatusCode, String)> {
    let assignment = state
        .store
        .assignment(assignment_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| {
            api_error(BookingError::not_found("seat assignment", assignment_id))
        })?;

    if assignment.holder_user_id != Some(user.user_id) && !user.is_staff {
        return Err((
            StatusCode::FORBIDDEN,
            "Seat is not held by this user".to_string(),
        ));
    }
    Ok(assignment)
}

/* ---------- SEATS ---------- */

// POST /api/seats/reserve
#[derive(Debug, Deserialize, Validate)]
struct ReserveSeatsRequest {
    #[validate(range(min = 1))]
    occurrence_id: i64,
    #[validate(length(min = 1, max = 10))]
    seat_assignment_ids: Vec<i64>,
    #[validate(range(min = 1, max = 240))]
    ttl_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SeatResult {
    assignment_id: i64,
    reserved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

// Batch semantics: independent per seat, best effort. One seat losing its
// race does not fail the rest; the caller gets one result per seat and can
// tell "seat taken" apart from "no credit" by the error tag.
async fn reserve_seats(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
    Json(req): Json<ReserveSeatsRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;

    let ttl = req
        .ttl_minutes
        .unwrap_or(state.config.booking.reservation_ttl_minutes);

    let outcomes = state
        .engine
        .reserve_seats(req.occurrence_id, &req.seat_assignment_ids, user.user_id, ttl)
        .await;

    state.cache.invalidate_seat_map(req.occurrence_id).await;

    let results: Vec<SeatResult> = outcomes
        .into_iter()
        .map(|(assignment_id, outcome)| match outcome {
            Ok(assignment) => SeatResult {
                assignment_id,
                reserved: true,
                expires_at: assignment.expires_at,
                error: None,
            },
            Err(e) => SeatResult {
                assignment_id,
                reserved: false,
                expires_at: None,
                error: Some(e.tag()),
            },
        })
        .collect();

    let status = if results.iter().any(|r| r.reserved) {
        StatusCode::CREATED
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(results)))
}

// PATCH /api/seats/confirm
#[derive(Debug, Deserialize, Validate)]
struct SeatActionRequest {
    #[validate(range(min = 1))]
    assignment_id: i64,
}

async fn confirm_seat(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
    Json(req): Json<SeatActionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;
    let assignment = owned_assignment(&state, req.assignment_id, &user).await?;

    let confirmed = state
        .engine
        .confirm(req.assignment_id)
        .await
        .map_err(api_error)?;

    state.cache.invalidate_seat_map(assignment.occurrence_id).await;
    Ok((StatusCode::OK, Json(confirmed)))
}

// PATCH /api/seats/release
async fn release_seat(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
    Json(req): Json<SeatActionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;
    let assignment = owned_assignment(&state, req.assignment_id, &user).await?;

    let released = state
        .engine
        .release(req.assignment_id)
        .await
        .map_err(api_error)?;

    state.cache.invalidate_seat_map(assignment.occurrence_id).await;

    // The freed seat may unblock someone in the queue if the class has not
    // started yet.
    if let Ok(Some(occ)) = state.store.occurrence(assignment.occurrence_id).await {
        if occ.is_upcoming(state.clock.now()) {
            if let Err(e) = state.promoter.promote_waiting_list(occ.id).await {
                tracing::error!("promotion after release failed: {}", e);
            }
        }
    }

    Ok((StatusCode::OK, Json(released)))
}

/* ---------- BOOKINGS & GRANTS ---------- */

// GET /api/bookings
async fn get_my_bookings(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let assignments = state
        .store
        .assignments_by_holder(user.user_id)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::OK, Json(assignments)))
}

// GET /api/grants
#[derive(Debug, Serialize)]
struct GrantSummary {
    kind: &'static str,
    id: i64,
    remaining: i32,
    expiry_date: chrono::DateTime<chrono::Utc>,
}

async fn get_my_grants(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let grants = state
        .store
        .grants_for_user(user.user_id)
        .await
        .map_err(api_error)?;

    let summaries: Vec<GrantSummary> = grants
        .iter()
        .map(|g| GrantSummary {
            kind: if g.is_membership() { "membership" } else { "package" },
            id: g.grant_ref().id(),
            remaining: g.balance(),
            expiry_date: g.expiry(),
        })
        .collect();
    Ok((StatusCode::OK, Json(summaries)))
}

/* ---------- WAITING LIST ---------- */

// POST /api/waitlist
#[derive(Debug, Deserialize, Validate)]
struct JoinWaitlistRequest {
    #[validate(range(min = 1))]
    occurrence_id: i64,
    preselected_credit: Option<GrantRef>,
}

async fn join_waiting_list(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
    Json(req): Json<JoinWaitlistRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;

    let occurrence = state
        .store
        .occurrence(req.occurrence_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| api_error(BookingError::not_found("occurrence", req.occurrence_id)))?;
    if !occurrence.accepts_bookings() {
        return Err(api_error(BookingError::OccurrenceNotBookable(occurrence.id)));
    }

    // Queueing only makes sense once the occurrence is fully booked.
    let available = state
        .store
        .available_assignments(req.occurrence_id)
        .await
        .map_err(api_error)?;
    if !available.is_empty() {
        return Err((
            StatusCode::CONFLICT,
            "Seats are still available, reserve one directly".to_string(),
        ));
    }

    let entry_id = state
        .store
        .insert_waiting_entry(
            NewWaitingEntry {
                occurrence_id: req.occurrence_id,
                user_id: user.user_id,
                preselected_credit: req.preselected_credit,
            },
            state.clock.now(),
        )
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "entry_id": entry_id })),
    ))
}

// PATCH /api/waitlist/cancel
#[derive(Debug, Deserialize, Validate)]
struct CancelWaitlistRequest {
    #[validate(range(min = 1))]
    entry_id: i64,
}

async fn cancel_waiting_entry(
    State(state): State<Arc<AppState>>,
    user: crate::middleware::AuthUser,
    Json(req): Json<CancelWaitlistRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;

    let entry = state
        .store
        .waiting_entry(req.entry_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| api_error(BookingError::not_found("waiting list entry", req.entry_id)))?;
    if entry.user_id != user.user_id {
        return Err((
            StatusCode::FORBIDDEN,
            "Waiting list entry belongs to another user".to_string(),
        ));
    }

    let cancelled = state
        .store
        .transition_waiting_entry(req.entry_id, WaitingStatus::Waiting, WaitingStatus::Cancelled)
        .await
        .map_err(api_error)?;
    if !cancelled {
        return Err((
            StatusCode::CONFLICT,
            "Entry already promoted, expired or cancelled".to_string(),
        ));
    }

    Ok((StatusCode::OK, Json(serde_json::json!({ "cancelled": true }))))
}
