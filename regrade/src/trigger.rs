//! HTTP surface of the worker.
//!
//! - `GET /health` always answers `{"status":"ok"}`.
//! - `POST /recalculate` runs one poll cycle and answers with its report. The request must carry
//!   the configured secret in `x-edge-function-secret`.

use crate::worker::QueueWorker;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

pub const SECRET_HEADER: &str = "x-edge-function-secret";

#[derive(Clone)]
pub struct TriggerState {
    worker: Arc<QueueWorker>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn router(worker: Arc<QueueWorker>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/recalculate", post(recalculate))
        .with_state(TriggerState { worker })
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Compares in time independent of where the two secrets differ. Only the length leaks.
fn secret_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

async fn recalculate(State(state): State<TriggerState>, headers: HeaderMap) -> Response {
    let expected = state.worker.config().trigger_secret.as_deref();
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    match (expected, provided) {
        (Some(expected), Some(provided)) if secret_matches(expected, provided) => {}
        _ => {
            warn!("Rejected recalculation trigger without a valid secret");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "unauthorized" })),
            )
                .into_response();
        }
    }

    match state.worker.poll_once().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!(error = %e, "Triggered poll cycle failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
