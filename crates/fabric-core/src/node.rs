//! Node Model
//!
//! Node records as reported by discovery sources. Records are plain values:
//! they are copied into and out of the node manager and replaced wholesale on
//! every accepted update.

use crate::source::Source;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Unique key of a node within the manager's scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub cluster: String,
    pub name: String,
}

impl Identity {
    pub fn new(cluster: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.name)
    }
}

/// Semantic role of a node address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressType {
    /// Address reachable inside the cluster network
    InternalIp,
    /// Public address
    ExternalIp,
    /// Address assigned to the node on the overlay network
    OverlayIp,
}

/// A typed node address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub kind: AddressType,
    pub ip: IpAddr,
}

impl NodeAddress {
    pub fn new(kind: AddressType, ip: IpAddr) -> Self {
        Self { kind, ip }
    }
}

/// Known state of a cluster node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    pub cluster: String,
    /// Discovery channel that produced this record.
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_health_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_health_ip: Option<IpAddr>,
    /// Index of the key used to encrypt traffic to this node; 0 disables encryption.
    #[serde(default)]
    pub encryption_key: u8,
    /// Source-specific metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Node {
    pub fn new(identity: &Identity, source: Source) -> Self {
        Self {
            name: identity.name.clone(),
            cluster: identity.cluster.clone(),
            source,
            ..Default::default()
        }
    }

    /// Record for a removed node when only its key is known.
    pub fn deleted(identity: &Identity, source: Source) -> Self {
        Self::new(identity, source)
    }

    pub fn with_address(mut self, kind: AddressType, ip: IpAddr) -> Self {
        self.addresses.push(NodeAddress::new(kind, ip));
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.cluster.clone(), self.name.clone())
    }

    /// Reachable node IP of the requested family.
    ///
    /// Internal addresses are preferred over external ones. Overlay addresses
    /// are never returned since they are routed through the node IP.
    pub fn node_ip(&self, ipv6: bool) -> Option<IpAddr> {
        let family = |a: &&NodeAddress| a.ip.is_ipv6() == ipv6;
        let of_kind = |kind| {
            self.addresses
                .iter()
                .filter(family)
                .find(|a| a.kind == kind)
                .map(|a| a.ip)
        };
        of_kind(AddressType::InternalIp).or_else(|| of_kind(AddressType::ExternalIp))
    }

    /// Addresses with the given role.
    pub fn addresses_of(&self, kind: AddressType) -> impl Iterator<Item = IpAddr> + '_ {
        self.addresses
            .iter()
            .filter(move |a| a.kind == kind)
            .map(|a| a.ip)
    }

    /// Health-check addresses that are set.
    pub fn health_ips(&self) -> impl Iterator<Item = IpAddr> {
        self.ipv4_health_ip.into_iter().chain(self.ipv6_health_ip)
    }

    /// Every IP this node may have projected into the IP cache.
    pub fn projected_ips(&self) -> Vec<IpAddr> {
        self.addresses
            .iter()
            .map(|a| a.ip)
            .chain(self.health_ips())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::new("default", "worker-1").to_string(), "default/worker-1");
    }

    #[test]
    fn test_node_ip_prefers_internal() {
        let node = Node::new(&Identity::new("c", "n"), Source::Kubernetes)
            .with_address(AddressType::ExternalIp, v4(203, 0, 113, 7))
            .with_address(AddressType::OverlayIp, v4(10, 200, 0, 1))
            .with_address(AddressType::InternalIp, v4(192, 168, 1, 7));

        assert_eq!(node.node_ip(false), Some(v4(192, 168, 1, 7)));
        assert_eq!(node.node_ip(true), None);
    }

    #[test]
    fn test_node_ip_falls_back_to_external() {
        let v6 = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        let node = Node::new(&Identity::new("c", "n"), Source::Local)
            .with_address(AddressType::ExternalIp, v4(203, 0, 113, 7))
            .with_address(AddressType::ExternalIp, v6);

        assert_eq!(node.node_ip(false), Some(v4(203, 0, 113, 7)));
        assert_eq!(node.node_ip(true), Some(v6));
    }

    #[test]
    fn test_projected_ips_include_health() {
        let mut node = Node::new(&Identity::new("c", "n"), Source::KvStore)
            .with_address(AddressType::OverlayIp, v4(10, 200, 0, 1));
        node.ipv4_health_ip = Some(v4(10, 200, 0, 2));

        assert_eq!(node.projected_ips(), vec![v4(10, 200, 0, 1), v4(10, 200, 0, 2)]);
    }

    #[test]
    fn test_decode_kvstore_value() {
        let json = r#"{
            "name": "worker-2",
            "cluster": "prod",
            "source": "kvstore",
            "addresses": [
                {"type": "internalIp", "ip": "192.168.1.8"},
                {"type": "overlayIp", "ip": "10.200.1.1"}
            ],
            "ipv4HealthIp": "10.200.1.2",
            "encryptionKey": 3
        }"#;

        let node: Node = serde_json::from_str(json).expect("valid node");
        assert_eq!(node.identity(), Identity::new("prod", "worker-2"));
        assert_eq!(node.source, Source::KvStore);
        assert_eq!(node.encryption_key, 3);
        assert_eq!(node.addresses_of(AddressType::OverlayIp).count(), 1);
        assert!(node.labels.is_empty());
    }
}
