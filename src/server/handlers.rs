//! HTTP handlers for the batch endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::coordinator::envelope_for;
use crate::models::{BatchEnvelope, BatchRequest};

use super::AppState;

/// POST /api/batch
///
/// Runs one coordinator invocation and returns the result envelope. All
/// traversal state (cursor, fan-out set) arrives in the request body, so the
/// endpoint itself stays stateless across calls.
pub async fn process_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchEnvelope>, (StatusCode, Json<serde_json::Value>)> {
    let filter = req.filter.clone();
    match state.coordinator.process_batch(req).await {
        Ok(outcome) => Ok(Json(envelope_for(&outcome, &filter))),
        Err(e) => {
            error!("batch processing failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            ))
        }
    }
}

/// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
