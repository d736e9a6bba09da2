//! IP Cache
//!
//! The IP cache maps IP addresses to security identities and routing
//! metadata. It is shared by every subsystem of the agent and arbitrated by
//! source: a binding owned by a more trusted source cannot be replaced by a
//! less trusted one.
//!
//! The node manager only depends on the [`IpCache`] trait. The upsert return
//! value tells the caller whether it owns the binding after the call, which is
//! how the manager decides whether datapath notifications are allowed.

mod memory;

pub use memory::{IpCacheEntry, MemoryIpCache};

use fabric_core::Source;
use std::fmt;
use std::net::IpAddr;

/// Identities reserved for infrastructure endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReservedIdentity {
    /// A cluster node
    Host,
    /// A node's health-check endpoint
    Health,
}

impl ReservedIdentity {
    /// Numeric security identity.
    pub const fn id(self) -> u32 {
        match self {
            ReservedIdentity::Host => 1,
            ReservedIdentity::Health => 4,
        }
    }
}

impl fmt::Display for ReservedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservedIdentity::Host => write!(f, "reserved:host"),
            ReservedIdentity::Health => write!(f, "reserved:health"),
        }
    }
}

/// Security identity bound to an IP, tagged with the source that set it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpIdentity {
    pub id: ReservedIdentity,
    pub source: Source,
}

impl IpIdentity {
    pub fn new(id: ReservedIdentity, source: Source) -> Self {
        Self { id, source }
    }
}

/// IP to identity binding store.
pub trait IpCache: Send + Sync {
    /// Bind `ip` to `identity`, routed through `host_ip` when set.
    ///
    /// Returns true if the binding is owned by `identity.source` after the
    /// call, either because it was created, replaced, or already owned.
    fn upsert(
        &self,
        ip: IpAddr,
        host_ip: Option<IpAddr>,
        encryption_key: u8,
        identity: IpIdentity,
    ) -> bool;

    /// Remove the binding for `ip` if it is owned by `source`.
    fn delete(&self, ip: IpAddr, source: Source);
}
