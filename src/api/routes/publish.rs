//! Publish Route
//!
//! - POST /api/v1/publish - Broadcast the raw request body to every subscriber

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::PublishResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// POST /api/v1/publish
///
/// The body is relayed byte-for-byte; it is not parsed.
pub async fn publish(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    if body.is_empty() {
        return Err(ApiError::Validation("Payload must not be empty".to_string()));
    }

    let report = state.hub.broadcast(body);

    tracing::debug!(
        delivered = report.delivered,
        evicted = report.evicted,
        "Published payload"
    );

    Ok((StatusCode::ACCEPTED, Json(report.into())))
}
