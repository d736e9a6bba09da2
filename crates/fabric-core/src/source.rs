//! Discovery Sources
//!
//! Every node record is tagged with the channel that reported it. Sources are
//! totally ordered by trust, and a record may only be replaced by a source at
//! least as trusted as the one that currently owns it.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Channel that produced a node record or an IP-cache binding.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    /// No source recorded
    #[default]
    Unspec,
    /// Derived internally, e.g. from allocation defaults
    Generated,
    /// Distributed key-value store
    KvStore,
    /// Cluster orchestrator API
    #[serde(rename = "k8s")]
    #[strum(serialize = "k8s")]
    Kubernetes,
    /// Local agent configuration
    Local,
}

impl Source {
    /// Trust rank of this source. Higher ranks win arbitration.
    pub const fn trust(self) -> u8 {
        match self {
            Source::Unspec => 0,
            Source::Generated => 1,
            Source::KvStore => 2,
            Source::Kubernetes => 3,
            Source::Local => 4,
        }
    }

    /// Label value used for metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Source::Unspec => "unspec",
            Source::Generated => "generated",
            Source::KvStore => "kvstore",
            Source::Kubernetes => "k8s",
            Source::Local => "local",
        }
    }
}

/// Returns true if state owned by `existing` may be overwritten by `new`.
pub fn allow_overwrite(existing: Source, new: Source) -> bool {
    new.trust() >= existing.trust()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_strictly_more_trusted_always_wins() {
        for a in Source::iter() {
            for b in Source::iter() {
                if a.trust() > b.trust() {
                    assert!(allow_overwrite(b, a), "{a} must overwrite {b}");
                    assert!(!allow_overwrite(a, b), "{b} must not overwrite {a}");
                }
            }
        }
    }

    #[test]
    fn test_same_source_may_overwrite_itself() {
        for source in Source::iter() {
            assert!(allow_overwrite(source, source));
        }
    }

    #[test]
    fn test_ranks_are_distinct() {
        let mut ranks: Vec<u8> = Source::iter().map(Source::trust).collect();
        ranks.sort_unstable();
        ranks.dedup();
        assert_eq!(ranks.len(), Source::iter().count());
    }

    #[test]
    fn test_orchestrator_beats_kvstore() {
        assert!(allow_overwrite(Source::KvStore, Source::Kubernetes));
        assert!(!allow_overwrite(Source::Kubernetes, Source::KvStore));
        assert!(allow_overwrite(Source::Kubernetes, Source::Local));
    }

    #[test]
    fn test_string_forms() {
        for source in Source::iter() {
            assert_eq!(source.to_string(), source.as_str());
            assert_eq!(Source::from_str(source.as_str()).ok(), Some(source));
        }
        assert!(Source::from_str("etcd").is_err());
        assert_eq!(
            serde_json::to_string(&Source::Kubernetes).ok().as_deref(),
            Some("\"k8s\"")
        );
    }
}
