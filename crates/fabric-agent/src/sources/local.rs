//! Local Source
//!
//! Nodes configured on this agent: the agent's own node and any nodes listed
//! in a JSON file. Local records are the most trusted and cannot be replaced
//! by any other source.

use crate::config::AgentConfig;
use crate::nodes::NodeManager;
use fabric_core::{Node, Source};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LocalSourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Record of the node this agent runs on
pub fn local_node(config: &AgentConfig) -> Node {
    Node::new(&config.local_identity(), Source::Local)
}

/// Parse a JSON array of node records and stamp them as local.
pub fn parse_local_nodes(path: &Path, contents: &str) -> Result<Vec<Node>, LocalSourceError> {
    let mut nodes: Vec<Node> =
        serde_json::from_str(contents).map_err(|source| LocalSourceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    for node in &mut nodes {
        node.source = Source::Local;
    }
    Ok(nodes)
}

/// Load the nodes file
pub async fn load_local_nodes(path: &Path) -> Result<Vec<Node>, LocalSourceError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LocalSourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_local_nodes(path, &contents)
}

/// Deliver local nodes to the manager. Returns the number of nodes delivered.
pub async fn apply_local_nodes(manager: &NodeManager, nodes: Vec<Node>) -> usize {
    let count = nodes.len();
    for node in nodes {
        debug!(identity = %node.identity(), "Local: delivering node");
        manager.node_updated(node).await;
    }
    info!(node_count = count, "Local nodes applied");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcache::MemoryIpCache;
    use crate::nodes::{LoggingNodeHandler, ManagerConfig};
    use crate::observability::MetricsRegistry;
    use fabric_core::{AddressType, Identity};
    use std::sync::Arc;

    const NODES: &str = r#"[
        {
            "name": "gw-1",
            "cluster": "edge",
            "addresses": [
                {"type": "internalIp", "ip": "192.168.10.1"},
                {"type": "overlayIp", "ip": "10.200.1.1"}
            ],
            "ipv4HealthIp": "10.200.1.2"
        },
        {"name": "gw-2", "cluster": "edge", "source": "kvstore"}
    ]"#;

    #[test]
    fn test_parse_local_nodes() {
        let nodes = parse_local_nodes(Path::new("nodes.json"), NODES).unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.source == Source::Local));
        assert_eq!(nodes[0].identity(), Identity::new("edge", "gw-1"));
        assert_eq!(nodes[0].addresses_of(AddressType::OverlayIp).count(), 1);
        assert!(nodes[0].ipv4_health_ip.is_some());
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let err = parse_local_nodes(Path::new("broken.json"), "{").unwrap_err();
        assert!(matches!(err, LocalSourceError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let path = std::env::temp_dir().join("fabric-agent-missing-nodes.json");
        let err = load_local_nodes(&path).await.unwrap_err();
        assert!(matches!(err, LocalSourceError::Read { .. }));
    }

    #[tokio::test]
    async fn test_load_and_apply() {
        let path = std::env::temp_dir().join(format!("fabric-agent-nodes-{}.json", std::process::id()));
        tokio::fs::write(&path, NODES).await.unwrap();
        let nodes = load_local_nodes(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        let manager = NodeManager::new(
            "local_test",
            Arc::new(LoggingNodeHandler),
            Arc::new(MemoryIpCache::new()),
            &MetricsRegistry::new(),
            ManagerConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(apply_local_nodes(&manager, nodes).await, 2);
        assert!(manager.exists(&Identity::new("edge", "gw-2")).await);
        assert_eq!(manager.nodes().await[&Identity::new("edge", "gw-1")].source, Source::Local);
    }

    #[test]
    fn test_local_node_uses_agent_identity() {
        let config = AgentConfig {
            cluster_name: "prod".to_string(),
            node_name: "worker-9".to_string(),
            ..Default::default()
        };
        let node = local_node(&config);
        assert_eq!(node.identity(), Identity::new("prod", "worker-9"));
        assert_eq!(node.source, Source::Local);
    }
}
