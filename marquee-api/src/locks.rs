use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_core::{LockFailure, LockLedgerEntry, LockRequest, SeatLockResult};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LockSeatsRequest {
    pub seat_numbers: Vec<String>,
    pub holder_id: String,
    #[serde(default)]
    pub ttl_seconds: i64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseLockRequest {
    pub holder_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmBookingRequest {
    pub holder_id: String,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockActionResponse {
    pub success: bool,
    pub message: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/showtimes/{showtime_id}/locks", post(lock_seats).get(active_locks))
        .route("/v1/locks/{lock_id}", get(lock_details))
        .route("/v1/locks/{lock_id}/release", post(release_lock))
        .route("/v1/locks/{lock_id}/confirm", post(confirm_booking))
        .route("/v1/holders/{holder_id}/locks", get(holder_locks))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/showtimes/{showtime_id}/locks
async fn lock_seats(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
    Json(req): Json<LockSeatsRequest>,
) -> Result<(StatusCode, Json<SeatLockResult>), AppError> {
    let request = LockRequest {
        showtime_id,
        seat_numbers: req.seat_numbers,
        holder_id: req.holder_id,
        ttl_seconds: req.ttl_seconds,
        idempotency_key: req.idempotency_key,
    };

    let result = state.manager.lock_seats(&request).await?;
    let status = match result.failure {
        None => StatusCode::OK,
        Some(LockFailure::NotFound) => StatusCode::NOT_FOUND,
        Some(LockFailure::Conflict) => StatusCode::CONFLICT,
        Some(LockFailure::Busy) => StatusCode::LOCKED,
        Some(LockFailure::Invalid) => StatusCode::BAD_REQUEST,
    };

    Ok((status, Json(result)))
}

/// POST /v1/locks/{lock_id}/release
async fn release_lock(
    State(state): State<AppState>,
    Path(lock_id): Path<Uuid>,
    Json(req): Json<ReleaseLockRequest>,
) -> Result<(StatusCode, Json<LockActionResponse>), AppError> {
    let released = state.manager.release_lock(lock_id, &req.holder_id).await?;
    Ok(action_response(released, "Lock released"))
}

/// POST /v1/locks/{lock_id}/confirm
async fn confirm_booking(
    State(state): State<AppState>,
    Path(lock_id): Path<Uuid>,
    Json(req): Json<ConfirmBookingRequest>,
) -> Result<(StatusCode, Json<LockActionResponse>), AppError> {
    let confirmed = state
        .manager
        .confirm_booking(lock_id, &req.holder_id, &req.user_id)
        .await?;
    Ok(action_response(confirmed, "Booking confirmed"))
}

/// GET /v1/locks/{lock_id}
async fn lock_details(
    State(state): State<AppState>,
    Path(lock_id): Path<Uuid>,
) -> Result<Json<LockLedgerEntry>, AppError> {
    state
        .manager
        .lock_details(lock_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError(format!("Lock not found: {}", lock_id)))
}

/// GET /v1/showtimes/{showtime_id}/locks
async fn active_locks(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
) -> Result<Json<Vec<LockLedgerEntry>>, AppError> {
    Ok(Json(state.manager.active_locks(&showtime_id).await?))
}

/// GET /v1/holders/{holder_id}/locks
async fn holder_locks(
    State(state): State<AppState>,
    Path(holder_id): Path<String>,
) -> Result<Json<Vec<LockLedgerEntry>>, AppError> {
    Ok(Json(state.manager.locks_for_holder(&holder_id).await?))
}

fn action_response(done: bool, message: &str) -> (StatusCode, Json<LockActionResponse>) {
    if done {
        (
            StatusCode::OK,
            Json(LockActionResponse {
                success: true,
                message: message.to_string(),
            }),
        )
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(LockActionResponse {
                success: false,
                message: "Lock not found, already resolved, or held by another holder".to_string(),
            }),
        )
    }
}
