//! Discovery Sources
//!
//! Producers of node events for the node manager.
//!
//! - `kvstore`: Node records shared through etcd
//! - `local`: Nodes configured on this agent

pub mod kvstore;
pub mod local;

pub use kvstore::{run_kvstore_source, KvStoreConfig, KvStoreSource};
pub use local::{apply_local_nodes, load_local_nodes, local_node, LocalSourceError};
