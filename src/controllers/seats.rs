use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::ApiError;
use crate::error::Failure;
use crate::models::{
    AdminEditRequest, CheckInRequest, MutationReply, PerformanceId, Reservation, ReserveRequest, SeatLayout,
    SeatSnapshot, Session, WalkInRequest,
};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/layout", get(layout))
        .route("/performances/{performance_id}/seats", get(get_seats).patch(admin_edit))
        .route(
            "/performances/{performance_id}/reservations",
            get(get_reservations).post(reserve),
        )
        .route("/performances/{performance_id}/check-in", post(check_in))
        .route("/performances/{performance_id}/walk-in", post(walk_in))
        .route("/performance", put(set_performance))
        .route("/timeslots/{group}", get(timeslots))
        .route("/status", get(status))
        .route("/online", post(set_online))
        .route("/sync", post(sync_now))
        .route("/fallback/retry", post(retry_offline))
        .route("/fallback/enable", post(enable_fallback))
        .route("/fallback/disable", post(disable_fallback))
}

fn performance(raw: &str) -> Result<PerformanceId, ApiError> {
    Ok(raw.parse::<PerformanceId>()?)
}

// GET /api/layout
async fn layout() -> Json<Value> {
    let layout = SeatLayout::default();
    Json(json!({ "rows": layout.cells(), "seatIds": layout.seat_ids() }))
}

// GET /api/performances/{id}/seats
async fn get_seats(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(raw): Path<String>,
) -> Result<Json<SeatSnapshot>, ApiError> {
    let performance_id = performance(&raw)?;
    Ok(Json(state.fallback.get_seats_data(session, &performance_id).await?))
}

// GET /api/performances/{id}/reservations
async fn get_reservations(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let performance_id = performance(&raw)?;
    Ok(Json(state.fallback.get_reservations_data(&performance_id).await?))
}

// POST /api/performances/{id}/reservations
async fn reserve(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(raw): Path<String>,
    Json(request): Json<ReserveRequest>,
) -> Result<Json<MutationReply>, ApiError> {
    let performance_id = performance(&raw)?;
    Ok(Json(state.fallback.reserve_seats(session, &performance_id, request).await?))
}

// POST /api/performances/{id}/check-in
async fn check_in(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(raw): Path<String>,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<MutationReply>, ApiError> {
    let performance_id = performance(&raw)?;
    Ok(Json(state.fallback.check_in_seats(session, &performance_id, request).await?))
}

// POST /api/performances/{id}/walk-in
async fn walk_in(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(raw): Path<String>,
    Json(request): Json<WalkInRequest>,
) -> Result<Json<MutationReply>, ApiError> {
    let performance_id = performance(&raw)?;
    Ok(Json(state.fallback.issue_walk_in(session, &performance_id, request).await?))
}

// PATCH /api/performances/{id}/seats
async fn admin_edit(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(raw): Path<String>,
    Json(request): Json<AdminEditRequest>,
) -> Result<Json<MutationReply>, ApiError> {
    let performance_id = performance(&raw)?;
    Ok(Json(state.fallback.admin_edit_seat(session, &performance_id, request).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentPerformance {
    performance_id: String,
}

// PUT /api/performance
async fn set_performance(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CurrentPerformance>,
) -> Result<Json<Value>, ApiError> {
    let performance_id = performance(&body.performance_id)?;
    state.fallback.set_performance_id(performance_id.clone());
    Ok(Json(json!({ "success": true, "performanceId": performance_id.to_string() })))
}

// GET /api/timeslots/{group}
async fn timeslots(
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let payload = state.gateway.get_all_timeslots_for_group(&group).await.into_result()?;
    Ok(Json(Value::Object(payload)))
}

// GET /api/status
async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let sync = state.sync.status().await.map_err(Failure::from)?;
    Ok(Json(json!({
        "fallback": state.fallback.stats(),
        "sync": sync,
        "loader": state.loader.queue_status(),
        "gateway": {
            "endpoints": state.gateway.endpoints().len(),
            "pendingCalls": state.gateway.pending_calls(),
        },
    })))
}

#[derive(Debug, Deserialize)]
struct OnlineHint {
    online: bool,
}

// POST /api/online
async fn set_online(State(state): State<Arc<AppState>>, Json(hint): Json<OnlineHint>) -> Json<Value> {
    state.sync.set_online(hint.online).await;
    if hint.online {
        state.worker.background_sync();
    }
    Json(json!({ "online": state.sync.is_online() }))
}

// POST /api/sync
async fn sync_now(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let report = state.sync.sweep().await.map_err(Failure::from)?;
    let snapshot = state.sync.sync_data().await.map_err(Failure::from)?;
    Ok(Json(json!({
        "sweep": report,
        "pulled": snapshot.map(|s| s.seats.len()),
    })))
}

// POST /api/fallback/retry
async fn retry_offline(State(state): State<Arc<AppState>>) -> Json<Value> {
    let available = state.fallback.retry_offline_functionality().await;
    Json(json!({ "offlineAvailable": available, "stats": state.fallback.stats() }))
}

// POST /api/fallback/enable
async fn enable_fallback(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.fallback.enable_fallback_mode();
    Json(json!({ "stats": state.fallback.stats() }))
}

// POST /api/fallback/disable
async fn disable_fallback(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.fallback.disable_fallback_mode();
    Json(json!({ "stats": state.fallback.stats() }))
}
