use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use marquee_core::{AvailabilityReport, Seat, SeatStatus};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub seat_numbers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeatMapQuery {
    pub status: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/showtimes/{showtime_id}/availability", post(check_availability))
        .route("/v1/showtimes/{showtime_id}/seats", get(seat_map))
        .route("/v1/showtimes/{showtime_id}/seats/available", get(available_seats))
}

/// POST /v1/showtimes/{showtime_id}/availability
async fn check_availability(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
    Json(req): Json<AvailabilityRequest>,
) -> Result<Json<AvailabilityReport>, AppError> {
    let report = state
        .manager
        .availability_report(&showtime_id, &req.seat_numbers)
        .await?;
    Ok(Json(report))
}

/// GET /v1/showtimes/{showtime_id}/seats?status=LOCKED
async fn seat_map(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
    Query(query): Query<SeatMapQuery>,
) -> Result<Json<Vec<Seat>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.to_ascii_uppercase().parse::<SeatStatus>())
        .transpose()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    ensure_showtime(&state, &showtime_id).await?;
    Ok(Json(state.manager.seat_map(&showtime_id, status).await?))
}

/// GET /v1/showtimes/{showtime_id}/seats/available
async fn available_seats(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
) -> Result<Json<Vec<Seat>>, AppError> {
    ensure_showtime(&state, &showtime_id).await?;
    Ok(Json(state.manager.available_seats(&showtime_id).await?))
}

async fn ensure_showtime(state: &AppState, showtime_id: &str) -> Result<(), AppError> {
    if !state.manager.showtime_exists(showtime_id).await? {
        return Err(AppError::NotFoundError(format!("Showtime not found: {}", showtime_id)));
    }
    Ok(())
}
