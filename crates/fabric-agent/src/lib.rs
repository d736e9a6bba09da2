//! Fabric Agent Library
//!
//! Cluster node management for the networking agent: discovery sources feed
//! node events into the node manager, which arbitrates between them and
//! programs the datapath.

pub mod api;
pub mod config;
pub mod ipcache;
pub mod nodes;
pub mod observability;
pub mod sources;
pub mod version;
