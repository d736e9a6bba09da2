//! HTTP API Module
//!
//! Query surface of the agent.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `nodes`: Node manager snapshot
//! - `version`: Build information

mod health;
mod metrics;
mod nodes;
mod state;
mod version;

pub use nodes::NodesResponse;
pub use state::AppState;
pub use version::VersionResponse;

use axum::{routing::get, Router};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        .route("/version", get(version::get_version))
        // Node manager
        .route("/nodes", get(nodes::get_nodes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcache::MemoryIpCache;
    use crate::nodes::{LoggingNodeHandler, ManagerConfig, NodeManager};
    use crate::observability::MetricsRegistry;
    use axum::{extract::State, http::StatusCode, response::IntoResponse};
    use fabric_core::{Identity, Node, Source};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    async fn state() -> AppState {
        let manager = NodeManager::new(
            "api_test",
            Arc::new(LoggingNodeHandler),
            Arc::new(MemoryIpCache::new()),
            &MetricsRegistry::new(),
            ManagerConfig::default(),
        )
        .await
        .unwrap();

        AppState {
            manager,
            metrics_state: None,
            node_name: "worker-1".to_string(),
            readiness: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_health_fails_after_close() {
        let state = state().await;
        assert_eq!(health::health_check(State(state.clone())).await, Ok("OK"));

        state.manager.close().await;
        assert_eq!(
            health::health_check(State(state)).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_readiness_follows_flag() {
        let state = state().await;
        assert_eq!(
            health::readiness_check(State(state.clone())).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );

        state.readiness.store(true, Ordering::Release);
        assert_eq!(health::readiness_check(State(state)).await, Ok("READY"));
    }

    #[tokio::test]
    async fn test_metrics_unavailable_without_recorder() {
        let response = metrics::get_metrics(State(state().await)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_nodes_sorted_by_identity() {
        let state = state().await;
        for (cluster, name) in [("b", "x"), ("a", "z"), ("a", "y")] {
            state
                .manager
                .node_updated(Node::new(&Identity::new(cluster, name), Source::Kubernetes))
                .await;
        }

        let response = nodes::get_nodes(State(state)).await.0;
        assert_eq!(response.node_count, 3);
        let order: Vec<_> = response.nodes.iter().map(|n| n.identity().to_string()).collect();
        assert_eq!(order, vec!["a/y", "a/z", "b/x"]);
    }

    #[tokio::test]
    async fn test_version_reports_node() {
        let response = version::get_version(State(state().await)).await.0;
        assert_eq!(response.node_name, "worker-1");
        assert_eq!(response.version, crate::version::VERSION);
    }

    #[tokio::test]
    async fn test_router_builds() {
        let _router = create_router(state().await);
    }
}
