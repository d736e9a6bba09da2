//! Structured Events
//!
//! Node lifecycle events with consistent field names. Each event carries an
//! `event_type` field so they can be filtered independently of the message.
//!
//! Event types:
//! - `node_discovered` - A node was added to a manager
//! - `node_update_rejected` - An update lost source arbitration
//! - `node_removed` - A node was deleted by its owning source
//! - `node_delete_ignored` - A delete came from a source not owning the node
//! - `local_node_deleted` - The orchestrator removed the node the agent runs on
//! - `manager_closed` - A manager tore down all of its nodes

use fabric_core::{Identity, Source};
use tracing::{debug, info, warn};

/// Emit a node discovered event
pub fn node_discovered(manager: &str, identity: &Identity, source: Source, datapath_updated: bool) {
    info!(
        event_type = "node_discovered",
        manager = %manager,
        identity = %identity,
        source = %source,
        datapath_updated = datapath_updated,
        "Node discovered"
    );
}

/// Emit a node update rejected event
pub fn node_update_rejected(manager: &str, identity: &Identity, owner: Source, source: Source) {
    debug!(
        event_type = "node_update_rejected",
        manager = %manager,
        identity = %identity,
        owner = %owner,
        source = %source,
        "Node update rejected, node is owned by a more trusted source"
    );
}

/// Emit a node removed event
pub fn node_removed(manager: &str, identity: &Identity, source: Source) {
    info!(
        event_type = "node_removed",
        manager = %manager,
        identity = %identity,
        source = %source,
        "Node removed"
    );
}

/// Emit a node delete ignored event
pub fn node_delete_ignored(manager: &str, identity: &Identity, owner: Source, source: Source) {
    debug!(
        event_type = "node_delete_ignored",
        manager = %manager,
        identity = %identity,
        owner = %owner,
        source = %source,
        "Ignoring node delete event, node is owned by another source"
    );
}

/// Emit a local node deleted event
pub fn local_node_deleted(manager: &str, identity: &Identity) {
    warn!(
        event_type = "local_node_deleted",
        manager = %manager,
        identity = %identity,
        "Orchestrator is deleting the local node, closing node manager"
    );
}

/// Emit a manager closed event
pub fn manager_closed(manager: &str, node_count: usize) {
    info!(
        event_type = "manager_closed",
        manager = %manager,
        node_count = node_count,
        "Node manager closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_functions_dont_panic() {
        let identity = Identity::new("default", "worker-1");
        node_discovered("all", &identity, Source::Kubernetes, true);
        node_update_rejected("all", &identity, Source::Kubernetes, Source::KvStore);
        node_removed("all", &identity, Source::Kubernetes);
        node_delete_ignored("all", &identity, Source::Kubernetes, Source::KvStore);
        local_node_deleted("all", &identity);
        manager_closed("all", 3);
    }
}
