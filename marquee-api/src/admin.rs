use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use marquee_core::SeatSpec;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateShowtimeRequest {
    pub showtime_id: String,
    pub rows: Vec<String>,
    pub seats_per_row: u32,
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShowtimeResponse {
    pub showtime_id: String,
    pub seat_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaintenanceResponse {
    pub showtime_id: String,
    pub seat_number: String,
    pub maintenance: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/showtimes", post(create_showtime))
        .route(
            "/v1/admin/showtimes/{showtime_id}/seats/{seat_number}/maintenance",
            put(set_maintenance),
        )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/admin/showtimes
async fn create_showtime(
    State(state): State<AppState>,
    Json(req): Json<CreateShowtimeRequest>,
) -> Result<(StatusCode, Json<ShowtimeResponse>), AppError> {
    let showtime_id = req.showtime_id.trim();
    if showtime_id.is_empty() {
        return Err(AppError::ValidationError("Showtime id is required".to_string()));
    }

    let rows: Vec<&str> = req.rows.iter().map(|r| r.trim()).filter(|r| !r.is_empty()).collect();
    if rows.is_empty() || req.seats_per_row == 0 {
        return Err(AppError::ValidationError("At least one row with one seat is required".to_string()));
    }

    let seats = SeatSpec::grid(&rows, req.seats_per_row, req.category.as_deref());
    if !state.provisioning.create_showtime(showtime_id, &seats).await? {
        return Err(AppError::ConflictError(format!("Showtime already exists: {}", showtime_id)));
    }

    info!("Created showtime {} with {} seats", showtime_id, seats.len());
    Ok((
        StatusCode::CREATED,
        Json(ShowtimeResponse {
            showtime_id: showtime_id.to_string(),
            seat_count: seats.len(),
        }),
    ))
}

/// PUT /v1/admin/showtimes/{showtime_id}/seats/{seat_number}/maintenance
async fn set_maintenance(
    State(state): State<AppState>,
    Path((showtime_id, seat_number)): Path<(String, String)>,
    Json(req): Json<MaintenanceRequest>,
) -> Result<Json<MaintenanceResponse>, AppError> {
    let changed = state
        .manager
        .set_maintenance(&showtime_id, &seat_number, req.enabled)
        .await?;

    if !changed {
        return Err(AppError::ConflictError(format!(
            "Seat {} on {} cannot be moved {} maintenance",
            seat_number,
            showtime_id,
            if req.enabled { "into" } else { "out of" }
        )));
    }

    Ok(Json(MaintenanceResponse {
        showtime_id,
        seat_number,
        maintenance: req.enabled,
    }))
}
