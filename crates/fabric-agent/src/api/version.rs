//! Build Information Endpoint

use super::AppState;
use crate::version;
use axum::{extract::State, Json};
use serde::Serialize;

/// Response for GET /version
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub git_dirty: bool,
    pub rustc: &'static str,
    pub target: &'static str,
    pub build_timestamp: &'static str,
    pub node_name: String,
}

/// GET /version - Build metadata of the running agent
pub async fn get_version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: version::VERSION,
        git_sha: version::GIT_SHA,
        git_dirty: version::GIT_DIRTY == "true",
        rustc: version::RUSTC_VERSION,
        target: version::TARGET,
        build_timestamp: version::BUILD_TIMESTAMP,
        node_name: state.node_name,
    })
}
