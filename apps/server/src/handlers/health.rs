use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub store_ok: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store_ok = match state.service.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Health probe failed: {}", e);
            false
        }
    };

    let uptime_secs = state.started_at.elapsed().as_secs();

    Json(HealthResponse {
        status: if store_ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs,
        store_ok,
    })
}
