//! Core shared types for fabric
//!
//! This crate contains the node model and the source arbitration policy
//! shared by the agent and every discovery source feeding it.

pub mod node;
pub mod source;

pub use node::{AddressType, Identity, Node, NodeAddress};
pub use source::{allow_overwrite, Source};
