use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use super::{reject, ApiResult};
use crate::engine::{AvailabilityMap, BookingOrigin};
use crate::models::*;
use crate::AppState;

// ── Catalog & availability ──

/// GET /api/procedures
pub async fn list_procedures(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Procedure>> {
    let procedures = state
        .service
        .procedures()
        .await
        .map_err(|e| reject("list procedures", e))?;
    Ok(Json(ApiResponse::success(procedures)))
}

/// GET /api/availability?horizon_days=&procedure_id=
///
/// Without `procedure_id` every free grid slot is listed; with it, only the
/// starts where that procedure fits.
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AvailabilityQuery>,
) -> ApiResult<AvailabilityMap> {
    let result = match q.procedure_id {
        Some(pid) => state.service.availability_for(pid, q.horizon_days).await,
        None => state.service.availability(q.horizon_days).await,
    };
    let map = result.map_err(|e| reject("availability", e))?;
    Ok(Json(ApiResponse::success(map)))
}

// ── Reservations ──

/// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReservationRequest>,
) -> ApiResult<Booking> {
    let booking = state
        .service
        .reserve(req, BookingOrigin::Client)
        .await
        .map_err(|e| reject("create booking", e))?;
    Ok(Json(ApiResponse::success(booking)))
}

/// GET /api/bookings/lookup?contact=
pub async fn lookup_bookings(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ContactQuery>,
) -> ApiResult<Vec<Booking>> {
    let bookings = state
        .service
        .bookings_by_contact(&q.contact)
        .await
        .map_err(|e| reject("lookup bookings", e))?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// PUT /api/bookings/{id}
pub async fn edit_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<EditReservationRequest>,
) -> ApiResult<Booking> {
    let booking = state
        .service
        .edit_reservation(id, req, BookingOrigin::Client)
        .await
        .map_err(|e| reject("edit booking", e))?;
    Ok(Json(ApiResponse::success(booking)))
}

/// POST /api/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Booking> {
    let booking = state
        .service
        .cancel(id)
        .await
        .map_err(|e| reject("cancel booking", e))?;
    Ok(Json(ApiResponse::success(booking)))
}
