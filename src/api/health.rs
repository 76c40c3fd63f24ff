use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub messengers: usize,
    pub connections: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let station = &state.sorting_station;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        messengers: station.len(),
        connections: station.total_connections(),
    })
}
