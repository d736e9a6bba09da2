//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers for Kubernetes.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};
use std::sync::atomic::Ordering;

/// Liveness probe endpoint. Fails once the node manager has been closed.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.manager.is_closed() {
        tracing::warn!(manager = %state.manager.name(), "Node manager closed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok("OK")
}

/// Readiness probe endpoint. Returns OK after the initial source sync completes.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.readiness.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
