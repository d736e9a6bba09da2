//! Node Listing Endpoint
//!
//! Exposes the node manager's view at GET /nodes

use super::AppState;
use axum::{extract::State, Json};
use fabric_core::Node;
use serde::Serialize;

/// Response for GET /nodes
#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub manager: String,
    pub node_count: usize,
    pub nodes: Vec<Node>,
}

/// GET /nodes - Snapshot of all known nodes, sorted by identity
#[tracing::instrument(skip(state))]
pub async fn get_nodes(State(state): State<AppState>) -> Json<NodesResponse> {
    let mut nodes: Vec<_> = state.manager.nodes().await.into_iter().collect();
    nodes.sort_by(|(a, _), (b, _)| a.cmp(b));
    let nodes: Vec<Node> = nodes.into_iter().map(|(_, node)| node).collect();

    Json(NodesResponse {
        manager: state.manager.name().to_string(),
        node_count: nodes.len(),
        nodes,
    })
}
