use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::errors::api_error;
use crate::middleware::AdminUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/seats/block", patch(block_seat))
        .route("/seats/unblock", patch(unblock_seat))
        .route("/seats/complete", patch(complete_seat))
        .route("/jobs/sweep", post(run_sweep))
        .route("/jobs/promote", post(run_promotion))
}

#[derive(Debug, Deserialize, Validate)]
struct SeatActionRequest {
    #[validate(range(min = 1))]
    assignment_id: i64,
}

fn bad_request(e: validator::ValidationErrors) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

// PATCH /api/seats/block
async fn block_seat(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<SeatActionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;
    let blocked = state
        .engine
        .block(req.assignment_id)
        .await
        .map_err(api_error)?;
    state.cache.invalidate_seat_map(blocked.occurrence_id).await;
    Ok((StatusCode::OK, Json(blocked)))
}

// PATCH /api/seats/unblock
async fn unblock_seat(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<SeatActionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;
    let unblocked = state
        .engine
        .unblock(req.assignment_id)
        .await
        .map_err(api_error)?;
    state.cache.invalidate_seat_map(unblocked.occurrence_id).await;

    // A seat just came back into the pool; the queue may be waiting on it.
    if let Ok(Some(occ)) = state.store.occurrence(unblocked.occurrence_id).await {
        if occ.is_upcoming(state.clock.now()) {
            if let Err(e) = state.promoter.promote_waiting_list(occ.id).await {
                tracing::error!("promotion after unblock failed: {}", e);
            }
        }
    }

    Ok((StatusCode::OK, Json(unblocked)))
}

// PATCH /api/seats/complete: attendance confirmation
async fn complete_seat(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<SeatActionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;
    let completed = state
        .engine
        .complete(req.assignment_id)
        .await
        .map_err(api_error)?;
    state.cache.invalidate_seat_map(completed.occurrence_id).await;
    Ok((StatusCode::OK, Json(completed)))
}

// POST /api/jobs/sweep: on-demand run of the expiration sweeper
async fn run_sweep(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let released = state.sweeper.sweep_expired().await.map_err(api_error)?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "released": released })),
    ))
}

// POST /api/jobs/promote: on-demand promotion sweep for one occurrence
#[derive(Debug, Deserialize, Validate)]
struct PromoteRequest {
    #[validate(range(min = 1))]
    occurrence_id: i64,
}

async fn run_promotion(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<PromoteRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(bad_request)?;
    let promoted = state
        .promoter
        .promote_waiting_list(req.occurrence_id)
        .await
        .map_err(api_error)?;
    state.cache.invalidate_seat_map(req.occurrence_id).await;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "promoted": promoted })),
    ))
}
