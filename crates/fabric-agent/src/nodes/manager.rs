//! Node Manager
//!
//! Single point of truth for the set of known cluster nodes. Discovery
//! sources report updates and deletions; the manager arbitrates between
//! sources, projects node addresses into the IP cache, and forwards accepted
//! changes to every subscribed datapath handler.

use super::handler::{report, HandlerSet, NodeHandler};
use super::store::{insert_locked, NodeStore};
use super::{ManagerConfig, NodeManagerError};
use crate::ipcache::{IpCache, IpIdentity, ReservedIdentity};
use crate::observability::events;
use crate::observability::{EventKind, MetricsRegistry, NodeMetrics};
use fabric_core::{allow_overwrite, AddressType, Identity, Node, Source};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Scale `base` by the natural logarithm of `1 + num_nodes`.
///
/// Zero nodes return `base` unchanged.
pub fn cluster_size_dependant_interval(base: Duration, num_nodes: usize) -> Duration {
    if num_nodes == 0 {
        return base;
    }

    let wait = base.as_nanos() as f64 * (num_nodes as f64).ln_1p();
    Duration::from_nanos(wait as u64)
}

/// Manages the set of known cluster nodes.
///
/// Cloning is cheap and yields a handle to the same manager.
#[derive(Clone)]
pub struct NodeManager {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: ManagerConfig,
    store: NodeStore,
    handlers: HandlerSet,
    ipcache: Arc<dyn IpCache>,
    metrics: NodeMetrics,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl NodeManager {
    /// Create a manager, subscribe `datapath` and start background
    /// validation.
    ///
    /// Fails if `name` cannot be registered as a metrics label. Must be
    /// called within a Tokio runtime.
    pub async fn new(
        name: impl Into<String>,
        datapath: Arc<dyn NodeHandler>,
        ipcache: Arc<dyn IpCache>,
        registry: &MetricsRegistry,
        config: ManagerConfig,
    ) -> Result<Self, NodeManagerError> {
        let name = name.into();
        let metrics = registry.register(&name)?;
        let (close_tx, close_rx) = watch::channel(false);

        let manager = Self {
            inner: Arc::new(Inner {
                name,
                config,
                store: NodeStore::default(),
                handlers: HandlerSet::default(),
                ipcache,
                metrics,
                closed: AtomicBool::new(false),
                close_tx,
                background: Mutex::new(None),
            }),
        };

        manager.subscribe(datapath).await;

        let handle = tokio::spawn(background_sync(Arc::downgrade(&manager.inner), close_rx));
        *manager.inner.background.lock() = Some(handle);

        info!(
            manager = %manager.inner.name,
            sync_interval = ?manager.inner.config.background_sync_interval,
            encrypt_node = manager.inner.config.encrypt_node,
            "Node manager started"
        );

        Ok(manager)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.inner.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn is_local(&self, identity: &Identity) -> bool {
        self.inner.config.local_node.as_ref() == Some(identity)
    }

    /// Register a handler and replay `node_add` for every known node.
    ///
    /// The replay and the registration happen under the map lock, so the
    /// handler observes each node exactly once: either through the replay or
    /// through a later notification. Registering the same handler twice is a
    /// no-op.
    pub async fn subscribe(&self, handler: Arc<dyn NodeHandler>) {
        let entries = self.inner.store.read().await;

        if self.inner.handlers.contains(&handler).await {
            debug!(manager = %self.inner.name, handler = %handler.name(), "Handler already subscribed");
            return;
        }

        for (identity, entry) in entries.iter() {
            let node = entry.lock().await;
            report(handler.as_ref(), "add", identity, handler.node_add(&node));
        }

        self.inner.handlers.insert(handler.clone()).await;
        drop(entries);

        debug!(manager = %self.inner.name, handler = %handler.name(), "Handler subscribed");
    }

    /// Remove a handler. Unknown handlers are ignored.
    pub async fn unsubscribe(&self, handler: &Arc<dyn NodeHandler>) {
        if self.inner.handlers.remove(handler).await {
            debug!(manager = %self.inner.name, handler = %handler.name(), "Handler unsubscribed");
        }
    }

    pub async fn num_handlers(&self) -> usize {
        self.inner.handlers.len().await
    }

    /// Project the node's addresses into the IP cache.
    ///
    /// Returns true only if every projection is owned by the node's source.
    fn project_addresses(&self, node: &Node) -> bool {
        let ipcache = self.inner.ipcache.as_ref();
        let host = IpIdentity::new(ReservedIdentity::Host, node.source);
        let mut owned = true;
        let mut node_ip = None;
        let mut node_ip4 = None;

        // Overlay addresses are routed through the reachable IPv4 node IP.
        for ip in node.addresses_of(AddressType::OverlayIp) {
            node_ip = node.node_ip(false);
            if ip.is_ipv4() {
                node_ip4 = node_ip;
            }
            owned &= ipcache.upsert(ip, node_ip, node.encryption_key, host);
        }

        if self.inner.config.encrypt_node {
            for address in node.addresses.iter().filter(|a| a.kind != AddressType::OverlayIp) {
                owned &= ipcache.upsert(address.ip, node_ip4, node.encryption_key, host);
            }
        }

        let health = IpIdentity::new(ReservedIdentity::Health, node.source);
        for ip in node.health_ips() {
            owned &= ipcache.upsert(ip, node.node_ip(false), node.encryption_key, health);
        }

        owned
    }

    /// Handle an updated or newly discovered node.
    ///
    /// The update is dropped if an existing record is owned by a more trusted
    /// source. Datapath handlers are only notified if every IP-cache
    /// projection is owned by the update's source; the record is stored
    /// either way.
    pub async fn node_updated(&self, node: Node) {
        let identity = node.identity();
        debug!(
            manager = %self.inner.name,
            identity = %identity,
            source = %node.source,
            "Received node update event"
        );

        if self.is_closed() {
            debug!(manager = %self.inner.name, identity = %identity, "Manager closed, discarding node update");
            return;
        }

        let datapath_update = self.project_addresses(&node);

        let mut entries = self.inner.store.write().await;
        if self.is_closed() {
            debug!(manager = %self.inner.name, identity = %identity, "Manager closed, discarding node update");
            return;
        }

        let existing = entries.get(&identity).cloned();
        match existing {
            Some(entry) => {
                self.inner.metrics.record_event(EventKind::Update, node.source);

                let mut current = entry.lock_owned().await;
                if !allow_overwrite(current.source, node.source) {
                    events::node_update_rejected(&self.inner.name, &identity, current.source, node.source);
                    return;
                }
                drop(entries);

                let old = std::mem::replace(&mut *current, node);
                if datapath_update {
                    self.inner
                        .handlers
                        .for_each(|h| report(h, "update", &identity, h.node_update(&old, &current)))
                        .await;
                }
            }
            None => {
                self.inner.metrics.record_event(EventKind::Add, node.source);

                let source = node.source;
                let current = insert_locked(&mut entries, identity.clone(), node).await;
                drop(entries);
                self.inner.metrics.node_added();

                events::node_discovered(&self.inner.name, &identity, source, datapath_update);
                if datapath_update {
                    self.inner
                        .handlers
                        .for_each(|h| report(h, "add", &identity, h.node_add(&current)))
                        .await;
                }
            }
        }
    }

    /// Handle a node deletion.
    ///
    /// Only the source owning the record may delete it. If the orchestrator
    /// deletes the node this agent runs on, the manager is closed instead.
    pub async fn node_deleted(&self, node: Node) {
        let identity = node.identity();
        debug!(
            manager = %self.inner.name,
            identity = %identity,
            source = %node.source,
            "Received node delete event"
        );

        let mut entries = self.inner.store.write().await;
        if self.is_closed() {
            debug!(manager = %self.inner.name, identity = %identity, "Manager closed, discarding node delete");
            return;
        }
        self.inner.metrics.record_event(EventKind::Delete, node.source);

        let Some(entry) = entries.get(&identity).cloned() else {
            return;
        };
        let current = entry.lock_owned().await;

        if current.source != node.source {
            let owner = current.source;
            drop(current);
            drop(entries);

            if node.source == Source::Kubernetes && self.is_local(&identity) {
                events::local_node_deleted(&self.inner.name, &identity);
                self.close().await;
            } else {
                events::node_delete_ignored(&self.inner.name, &identity, owner, node.source);
            }
            return;
        }

        for ip in current.projected_ips() {
            self.inner.ipcache.delete(ip, node.source);
        }
        self.inner.metrics.node_removed();

        entries.remove(&identity);
        drop(entries);

        self.inner
            .handlers
            .for_each(|h| report(h, "delete", &identity, h.node_delete(&current)))
            .await;
        drop(current);

        events::node_removed(&self.inner.name, &identity, node.source);
    }

    pub async fn exists(&self, identity: &Identity) -> bool {
        self.inner.store.contains(identity).await
    }

    pub async fn node_identities(&self) -> Vec<Identity> {
        self.inner.store.identities().await
    }

    /// Point-in-time copy of all nodes.
    pub async fn nodes(&self) -> HashMap<Identity, Node> {
        self.inner.store.snapshot().await
    }

    pub async fn num_nodes(&self) -> usize {
        self.inner.store.len().await
    }

    /// [`cluster_size_dependant_interval`] for the current node count.
    pub async fn cluster_size_dependant_interval(&self, base: Duration) -> Duration {
        cluster_size_dependant_interval(base, self.num_nodes().await)
    }

    async fn background_sync_interval(&self) -> Duration {
        self.cluster_size_dependant_interval(self.inner.config.background_sync_interval)
            .await
    }

    /// Notify `node_delete` for every node and empty the manager. The manager
    /// keeps accepting events afterwards.
    pub async fn delete_all_nodes(&self) {
        let count = self.drain().await;
        info!(manager = %self.inner.name, node_count = count, "Deleted all nodes");
    }

    async fn drain(&self) -> usize {
        let mut entries = self.inner.store.write().await;
        let count = entries.len();

        for (identity, entry) in entries.drain() {
            let node = entry.lock().await;
            self.inner
                .handlers
                .for_each(|h| report(h, "delete", &identity, h.node_delete(&node)))
                .await;
        }

        self.inner.metrics.reset_nodes();
        count
    }

    /// Tear the manager down.
    ///
    /// Every known node is deleted from the datapath, the metrics name is
    /// released and the background loop is stopped. Later calls return
    /// immediately.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.inner.close_tx.send(true);

        let count = self.drain().await;
        self.inner.metrics.unregister();

        let background = self.inner.background.lock().take();
        if let Some(handle) = background {
            if let Err(e) = handle.await {
                warn!(manager = %self.inner.name, error = %e, "Background sync task failed");
            }
        }

        events::manager_closed(&self.inner.name, count);
    }

    /// Ask every handler to re-validate every node.
    ///
    /// Nodes deleted since the identities were collected are skipped.
    async fn validate_all(&self) {
        for identity in self.inner.store.identities().await {
            let Some(node) = self.inner.store.lock(&identity).await else {
                continue;
            };

            self.inner
                .handlers
                .for_each(|h| report(h, "validate", &identity, h.node_validate_implementation(&node)))
                .await;
            drop(node);

            self.inner.metrics.record_validation();
        }
    }
}

/// Periodic datapath validation.
///
/// Holds only a weak reference so a dropped manager ends the loop.
async fn background_sync(manager: Weak<Inner>, mut close_rx: watch::Receiver<bool>) {
    loop {
        if *close_rx.borrow() {
            return;
        }

        let Some(inner) = manager.upgrade() else {
            return;
        };
        let node_manager = NodeManager { inner };

        let interval = node_manager.background_sync_interval().await;
        debug!(
            manager = %node_manager.name(),
            sync_interval = ?interval,
            "Performing regular background work"
        );
        node_manager.validate_all().await;
        drop(node_manager);

        tokio::select! {
            _ = close_rx.changed() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
