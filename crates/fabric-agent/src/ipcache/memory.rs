//! In-memory IP cache with source arbitration.

use super::{IpCache, IpIdentity};
use fabric_core::{allow_overwrite, Source};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, trace};

/// A single IP binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpCacheEntry {
    pub identity: IpIdentity,
    pub host_ip: Option<IpAddr>,
    pub encryption_key: u8,
}

/// IP cache held in process memory.
#[derive(Debug, Default)]
pub struct MemoryIpCache {
    entries: RwLock<HashMap<IpAddr, IpCacheEntry>>,
}

impl MemoryIpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ip: &IpAddr) -> Option<IpCacheEntry> {
        self.entries.read().get(ip).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl IpCache for MemoryIpCache {
    fn upsert(
        &self,
        ip: IpAddr,
        host_ip: Option<IpAddr>,
        encryption_key: u8,
        identity: IpIdentity,
    ) -> bool {
        let mut entries = self.entries.write();

        if let Some(cached) = entries.get(&ip) {
            if !allow_overwrite(cached.identity.source, identity.source) {
                debug!(
                    ip = %ip,
                    owner = %cached.identity.source,
                    source = %identity.source,
                    "Skipping IP cache upsert, binding owned by a more trusted source"
                );
                return false;
            }
        }

        trace!(ip = %ip, identity = %identity.id, source = %identity.source, "Upserting IP cache binding");
        entries.insert(
            ip,
            IpCacheEntry {
                identity,
                host_ip,
                encryption_key,
            },
        );
        true
    }

    fn delete(&self, ip: IpAddr, source: Source) {
        let mut entries = self.entries.write();
        match entries.get(&ip) {
            Some(cached) if cached.identity.source == source => {
                trace!(ip = %ip, source = %source, "Deleting IP cache binding");
                entries.remove(&ip);
            }
            Some(cached) => {
                debug!(
                    ip = %ip,
                    owner = %cached.identity.source,
                    source = %source,
                    "Ignoring IP cache delete from non-owning source"
                );
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcache::ReservedIdentity;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn host(source: Source) -> IpIdentity {
        IpIdentity::new(ReservedIdentity::Host, source)
    }

    #[test]
    fn test_new_binding_is_owned() {
        let cache = MemoryIpCache::new();
        assert!(cache.upsert(ip(1), None, 0, host(Source::KvStore)));
        assert_eq!(cache.get(&ip(1)).map(|e| e.identity.source), Some(Source::KvStore));
    }

    #[test]
    fn test_less_trusted_source_does_not_take_over() {
        let cache = MemoryIpCache::new();
        assert!(cache.upsert(ip(1), Some(ip(100)), 0, host(Source::Kubernetes)));
        assert!(!cache.upsert(ip(1), Some(ip(200)), 0, host(Source::KvStore)));

        let entry = cache.get(&ip(1)).expect("binding present");
        assert_eq!(entry.identity.source, Source::Kubernetes);
        assert_eq!(entry.host_ip, Some(ip(100)));
    }

    #[test]
    fn test_more_trusted_source_takes_over() {
        let cache = MemoryIpCache::new();
        assert!(cache.upsert(ip(1), None, 0, host(Source::KvStore)));
        assert!(cache.upsert(ip(1), None, 5, host(Source::Local)));
        assert_eq!(cache.get(&ip(1)).map(|e| e.encryption_key), Some(5));
    }

    #[test]
    fn test_delete_requires_owner() {
        let cache = MemoryIpCache::new();
        cache.upsert(ip(1), None, 0, host(Source::Kubernetes));

        cache.delete(ip(1), Source::KvStore);
        assert_eq!(cache.len(), 1);

        cache.delete(ip(1), Source::Kubernetes);
        assert!(cache.is_empty());
    }
}
