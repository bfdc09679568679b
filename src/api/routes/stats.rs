//! Stats Route
//!
//! - GET /api/v1/stats - Hub counters

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::StatsResponse;
use crate::api::state::AppState;

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        hub: state.hub.stats(),
        uptime_seconds: state.uptime_seconds(),
    })
}
