use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use super::{reject, ApiResult};
use crate::engine::BookingOrigin;
use crate::models::*;
use crate::AppState;

// ── Schedule ──

/// GET /api/admin/schedule
pub async fn get_schedule(State(state): State<Arc<AppState>>) -> ApiResult<ScheduleTemplate> {
    let template = state
        .service
        .schedule_template()
        .await
        .map_err(|e| reject("get schedule", e))?;
    Ok(Json(ApiResponse::success(template)))
}

/// PUT /api/admin/schedule
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleTemplate>,
) -> ApiResult<ScheduleTemplate> {
    let template = state
        .service
        .update_schedule_template(body)
        .await
        .map_err(|e| reject("update schedule", e))?;
    Ok(Json(ApiResponse::success(template)))
}

// ── Procedures ──

/// GET /api/admin/procedures
pub async fn list_procedures(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Procedure>> {
    let procedures = state
        .service
        .procedures()
        .await
        .map_err(|e| reject("list procedures", e))?;
    Ok(Json(ApiResponse::success(procedures)))
}

/// POST /api/admin/procedures
pub async fn create_procedure(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateProcedureRequest>,
) -> ApiResult<Procedure> {
    let procedure = state
        .service
        .create_procedure(body)
        .await
        .map_err(|e| reject("create procedure", e))?;
    Ok(Json(ApiResponse::success(procedure)))
}

/// POST /api/admin/procedures/defaults: re-add missing catalog entries.
pub async fn restore_default_procedures(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<Procedure>> {
    let added = state
        .service
        .restore_default_procedures()
        .await
        .map_err(|e| reject("restore default procedures", e))?;
    Ok(Json(ApiResponse::success(added)))
}

/// PUT /api/admin/procedures/{id}
pub async fn update_procedure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateProcedureRequest>,
) -> ApiResult<Procedure> {
    let procedure = state
        .service
        .update_procedure(id, body)
        .await
        .map_err(|e| reject("update procedure", e))?;
    Ok(Json(ApiResponse::success(procedure)))
}

/// DELETE /api/admin/procedures/{id}
pub async fn delete_procedure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<&'static str> {
    state
        .service
        .delete_procedure(id)
        .await
        .map_err(|e| reject("delete procedure", e))?;
    Ok(Json(ApiResponse::success("Procedimento removido")))
}

// ── Bookings ──

/// GET /api/admin/bookings?date=&from=&to=&status=
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingsQuery>,
) -> ApiResult<Vec<Booking>> {
    let bookings = state
        .service
        .bookings(&query)
        .await
        .map_err(|e| reject("list bookings", e))?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// POST /api/admin/bookings: confirmed right away, may fall outside the
/// weekly template.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReservationRequest>,
) -> ApiResult<Booking> {
    let booking = state
        .service
        .reserve(req, BookingOrigin::Admin)
        .await
        .map_err(|e| reject("admin create booking", e))?;
    Ok(Json(ApiResponse::success(booking)))
}

/// PUT /api/admin/bookings/{id}
pub async fn edit_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<EditReservationRequest>,
) -> ApiResult<Booking> {
    let booking = state
        .service
        .edit_reservation(id, req, BookingOrigin::Admin)
        .await
        .map_err(|e| reject("admin edit booking", e))?;
    Ok(Json(ApiResponse::success(booking)))
}

/// PUT /api/admin/bookings/{id}/status
pub async fn set_booking_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<StatusRequest>,
) -> ApiResult<Booking> {
    let booking = state
        .service
        .set_status(id, body.status)
        .await
        .map_err(|e| reject("set booking status", e))?;
    Ok(Json(ApiResponse::success(booking)))
}

/// DELETE /api/admin/bookings/{id}
pub async fn discard_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<&'static str> {
    state
        .service
        .discard(id)
        .await
        .map_err(|e| reject("discard booking", e))?;
    Ok(Json(ApiResponse::success("Agendamento excluído")))
}

// ── Clients ──

/// GET /api/admin/clients?birthdays=today|month
pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientsQuery>,
) -> ApiResult<Vec<ClientSummary>> {
    let clients = state
        .service
        .clients(&query)
        .await
        .map_err(|e| reject("list clients", e))?;
    Ok(Json(ApiResponse::success(clients)))
}

// ── Reminders ──

/// GET /api/admin/reminders?date=
pub async fn due_reminders(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RemindersQuery>,
) -> ApiResult<Vec<Booking>> {
    let bookings = state
        .service
        .due_reminders(q.date)
        .await
        .map_err(|e| reject("due reminders", e))?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// POST /api/admin/bookings/{id}/reminder-sent
pub async fn mark_reminder_sent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Booking> {
    let booking = state
        .service
        .mark_reminder_sent(id)
        .await
        .map_err(|e| reject("mark reminder sent", e))?;
    Ok(Json(ApiResponse::success(booking)))
}

/// GET /api/admin/maintenance?days=
pub async fn maintenance_due(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MaintenanceQuery>,
) -> ApiResult<Vec<Booking>> {
    let bookings = state
        .service
        .maintenance_due(q.days)
        .await
        .map_err(|e| reject("maintenance due", e))?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// POST /api/admin/bookings/{id}/maintenance-sent
pub async fn mark_maintenance_sent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Booking> {
    let booking = state
        .service
        .mark_maintenance_reminder_sent(id)
        .await
        .map_err(|e| reject("mark maintenance sent", e))?;
    Ok(Json(ApiResponse::success(booking)))
}

// ── Revenue ──

/// GET /api/admin/revenue
pub async fn revenue(State(state): State<Arc<AppState>>) -> ApiResult<Vec<RevenueEntry>> {
    let entries = state
        .service
        .revenue_entries()
        .await
        .map_err(|e| reject("revenue", e))?;
    Ok(Json(ApiResponse::success(entries)))
}
