//! KV-Store Source
//!
//! Feeds node records stored in etcd into the node manager:
//! 1. Connection - Connect to etcd with exponential backoff
//! 2. Synchronization - Fetch every record under the prefix
//! 3. Maintenance - Watch the prefix for changes
//!
//! Keys have the form `<prefix><cluster>/<name>`, values are JSON node
//! records. Every event is delivered with the `kvstore` source.

use crate::config::AgentConfig;
use crate::nodes::NodeManager;
use anyhow::{anyhow, Result};
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{Client, EventType, GetOptions, WatchOptions, WatchStream};
use fabric_core::{Identity, Node, Source};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Key of a node record
pub fn node_key(prefix: &str, identity: &Identity) -> String {
    format!("{}{}/{}", prefix, identity.cluster, identity.name)
}

/// Identity encoded in a node key, or None if the key is not a node key
/// under `prefix`.
pub fn parse_node_key(prefix: &str, key: &str) -> Option<Identity> {
    let rest = key.strip_prefix(prefix)?;
    let (cluster, name) = rest.split_once('/')?;
    if cluster.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(Identity::new(cluster, name))
}

/// Decode a stored node record. The key is authoritative for the identity.
pub fn decode_node(identity: &Identity, value: &[u8]) -> Result<Node, serde_json::Error> {
    let mut node: Node = serde_json::from_slice(value)?;
    node.cluster = identity.cluster.clone();
    node.name = identity.name.clone();
    node.source = Source::KvStore;
    Ok(node)
}

/// Change of a node record observed in the store
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Updated(Node),
    Deleted(Identity),
}

/// Decode a single watch event. Foreign keys and undecodable values are
/// logged and skipped.
pub fn decode_event(prefix: &str, event_type: EventType, key: &[u8], value: &[u8]) -> Option<NodeEvent> {
    let key = match std::str::from_utf8(key) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "Non UTF-8 key in node prefix");
            return None;
        }
    };

    let Some(identity) = parse_node_key(prefix, key) else {
        warn!(key = %key, "Invalid node key");
        return None;
    };

    match event_type {
        EventType::Put => match decode_node(&identity, value) {
            Ok(node) => Some(NodeEvent::Updated(node)),
            Err(e) => {
                warn!(key = %key, error = %e, "Invalid node record JSON");
                None
            }
        },
        EventType::Delete => Some(NodeEvent::Deleted(identity)),
    }
}

/// Settings of the KV-store source
#[derive(Debug, Clone)]
pub struct KvStoreConfig {
    pub endpoints: Vec<String>,
    pub prefix: String,
    pub reconnect_delay: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_max_elapsed: Duration,
    pub backoff_multiplier: f64,
}

impl From<&AgentConfig> for KvStoreConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            endpoints: config.etcd_endpoints.clone(),
            prefix: config.kvstore_prefix.clone(),
            reconnect_delay: config.reconnect_delay,
            backoff_initial: config.etcd_backoff_initial,
            backoff_max: config.etcd_backoff_max,
            backoff_max_elapsed: config.etcd_backoff_max_elapsed,
            backoff_multiplier: config.etcd_backoff_multiplier,
        }
    }
}

/// Connect to etcd with exponential backoff
pub async fn connect(config: &KvStoreConfig) -> Result<Client> {
    let backoff = ExponentialBackoff {
        initial_interval: config.backoff_initial,
        max_interval: config.backoff_max,
        max_elapsed_time: Some(config.backoff_max_elapsed),
        multiplier: config.backoff_multiplier,
        ..Default::default()
    };

    retry(backoff, || async {
        match Client::connect(&config.endpoints, None).await {
            Ok(client) => {
                debug!("Connected to etcd");
                Ok(client)
            }
            Err(e) => {
                warn!(error = %e, "etcd connection failed, retrying");
                Err(backoff::Error::transient(e))
            }
        }
    })
    .await
    .map_err(|e| anyhow!("Failed to connect to etcd after retries: {:?}", e))
}

/// Node source backed by etcd
pub struct KvStoreSource {
    client: Client,
    config: KvStoreConfig,
    manager: NodeManager,
    /// Set once the first synchronization completed
    readiness: Arc<AtomicBool>,
    /// Identities currently delivered by this source
    known: HashSet<Identity>,
}

impl KvStoreSource {
    pub async fn new(
        config: KvStoreConfig,
        manager: NodeManager,
        readiness: Arc<AtomicBool>,
    ) -> Result<Self> {
        debug!(endpoints = ?config.endpoints, prefix = %config.prefix, "Creating KV-store source");
        let client = connect(&config).await?;

        Ok(Self {
            client,
            config,
            manager,
            readiness,
            known: HashSet::new(),
        })
    }

    /// Fetch every record and deliver it to the manager.
    ///
    /// Records delivered by an earlier synchronization that are gone now are
    /// deleted. Returns the store revision the snapshot was taken at.
    async fn synchronize(&mut self) -> Result<i64> {
        info!(prefix = %self.config.prefix, "KV-store: synchronizing nodes");

        let resp = self
            .client
            .get(self.config.prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();

        let mut seen = HashSet::new();
        for kv in resp.kvs() {
            if let Some(NodeEvent::Updated(node)) =
                decode_event(&self.config.prefix, EventType::Put, kv.key(), kv.value())
            {
                seen.insert(node.identity());
                self.manager.node_updated(node).await;
            }
        }

        for identity in self.known.difference(&seen) {
            debug!(identity = %identity, "KV-store: node vanished while disconnected");
            self.manager
                .node_deleted(Node::deleted(identity, Source::KvStore))
                .await;
        }

        info!(node_count = seen.len(), revision = revision, "KV-store: synchronization complete");
        self.known = seen;
        self.readiness.store(true, Ordering::Release);

        Ok(revision)
    }

    async fn watch(&mut self, revision: i64) -> Result<WatchStream> {
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(revision + 1);
        let stream = self
            .client
            .watch(self.config.prefix.as_str(), Some(options))
            .await?;

        debug!(revision = revision, "Watch stream established");
        Ok(stream)
    }

    /// Synchronize and open a watch starting after the snapshot.
    async fn resume(&mut self) -> Result<WatchStream> {
        let revision = self.synchronize().await?;
        self.watch(revision).await
    }

    /// Process a single watch response.
    async fn process_watch_event(&mut self, stream: &mut WatchStream) -> Result<()> {
        let Some(resp) = stream.message().await? else {
            return Err(anyhow!("Watch stream closed"));
        };

        if resp.canceled() {
            warn!("Watch stream canceled, will reconnect");
            return Err(anyhow!("Watch stream canceled"));
        }

        for event in resp.events() {
            let Some(kv) = event.kv() else {
                continue;
            };

            match decode_event(&self.config.prefix, event.event_type(), kv.key(), kv.value()) {
                Some(NodeEvent::Updated(node)) => {
                    debug!(identity = %node.identity(), "Watch: node updated");
                    self.known.insert(node.identity());
                    self.manager.node_updated(node).await;
                }
                Some(NodeEvent::Deleted(identity)) => {
                    debug!(identity = %identity, "Watch: node deleted");
                    self.known.remove(&identity);
                    self.manager
                        .node_deleted(Node::deleted(&identity, Source::KvStore))
                        .await;
                }
                None => {}
            }
        }

        Ok(())
    }

    /// Synchronize, then watch until shutdown. A broken watch is re-established
    /// after `reconnect_delay` with a fresh synchronization.
    pub async fn run(mut self, mut shutdown_rx: mpsc::UnboundedReceiver<()>) -> Result<()> {
        let mut stream = self.resume().await?;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("KV-store: received shutdown signal");
                    return Ok(());
                }

                result = self.process_watch_event(&mut stream) => {
                    if let Err(e) = result {
                        warn!(error = %e, "Watch event processing failed, reconnecting");
                        let delay = self.config.reconnect_delay;
                        match unless_shutdown(delay, &mut shutdown_rx, self.resume()).await {
                            None => {
                                info!("KV-store: received shutdown signal while reconnecting");
                                return Ok(());
                            }
                            Some(Ok(new_stream)) => {
                                stream = new_stream;
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "Failed to re-establish watch stream");
                                return Err(e);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Wait `delay`, then run `task`. Returns None if shutdown is signalled
/// first, in which case `task` is dropped.
async fn unless_shutdown<T>(
    delay: Duration,
    shutdown_rx: &mut mpsc::UnboundedReceiver<()>,
    task: impl Future<Output = T>,
) -> Option<T> {
    let delayed = async {
        tokio::time::sleep(delay).await;
        task.await
    };

    tokio::select! {
        _ = shutdown_rx.recv() => None,
        output = delayed => Some(output),
    }
}

/// Connect and run the KV-store source until shutdown
pub async fn run_kvstore_source(
    config: KvStoreConfig,
    manager: NodeManager,
    readiness: Arc<AtomicBool>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let source = KvStoreSource::new(config, manager, readiness).await?;
    source.run(shutdown_rx).await
}
