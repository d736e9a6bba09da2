//! Datapath Handlers
//!
//! Subscribers that translate node lifecycle notifications into forwarding
//! state. Every notification is delivered synchronously while the manager
//! holds the lock of the node it concerns, so a handler never observes a
//! record that is being replaced concurrently.

use fabric_core::{Identity, Node};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Failure reported by a datapath handler. The manager logs it and carries
/// on with the remaining handlers.
#[derive(Debug, Error)]
pub enum DatapathError {
    #[error("datapath unavailable: {0}")]
    Unavailable(String),

    #[error("failed to program node {identity}: {reason}")]
    Programming { identity: Identity, reason: String },
}

/// Receiver of node lifecycle notifications.
///
/// Implementations must return promptly: a blocked call stalls every other
/// operation on the same node. They must not subscribe or unsubscribe
/// handlers from within a notification.
pub trait NodeHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn node_add(&self, node: &Node) -> Result<(), DatapathError>;

    fn node_update(&self, old: &Node, new: &Node) -> Result<(), DatapathError>;

    fn node_delete(&self, node: &Node) -> Result<(), DatapathError>;

    /// Re-assert that the datapath implements `node`.
    fn node_validate_implementation(&self, node: &Node) -> Result<(), DatapathError>;
}

/// Registered handlers. Membership is guarded independently of the node map.
#[derive(Default)]
pub(crate) struct HandlerSet {
    handlers: RwLock<Vec<Arc<dyn NodeHandler>>>,
}

impl HandlerSet {
    /// Returns false if the handler was already registered.
    pub(crate) async fn insert(&self, handler: Arc<dyn NodeHandler>) -> bool {
        let mut handlers = self.handlers.write().await;
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Returns false if the handler was not registered.
    pub(crate) async fn remove(&self, handler: &Arc<dyn NodeHandler>) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        handlers.len() != before
    }

    pub(crate) async fn contains(&self, handler: &Arc<dyn NodeHandler>) -> bool {
        self.handlers
            .read()
            .await
            .iter()
            .any(|h| same_handler(h, handler))
    }

    pub(crate) async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Run `f` against every handler while holding the membership read lock.
    pub(crate) async fn for_each(&self, mut f: impl FnMut(&dyn NodeHandler)) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            f(handler.as_ref());
        }
    }
}

fn same_handler(a: &Arc<dyn NodeHandler>, b: &Arc<dyn NodeHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Log a failed notification.
pub(crate) fn report(
    handler: &dyn NodeHandler,
    operation: &'static str,
    identity: &Identity,
    result: Result<(), DatapathError>,
) {
    if let Err(e) = result {
        warn!(
            handler = %handler.name(),
            operation = operation,
            identity = %identity,
            error = %e,
            "Datapath handler failed"
        );
    }
}

/// Handler that only records notifications in the log.
///
/// Used when the agent runs without a datapath, e.g. to observe what the
/// node manager would program.
#[derive(Debug, Default)]
pub struct LoggingNodeHandler;

impl NodeHandler for LoggingNodeHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn node_add(&self, node: &Node) -> Result<(), DatapathError> {
        info!(
            identity = %node.identity(),
            source = %node.source,
            addresses = node.addresses.len(),
            "Datapath: node add"
        );
        Ok(())
    }

    fn node_update(&self, old: &Node, new: &Node) -> Result<(), DatapathError> {
        info!(
            identity = %new.identity(),
            old_source = %old.source,
            new_source = %new.source,
            changed = old != new,
            "Datapath: node update"
        );
        Ok(())
    }

    fn node_delete(&self, node: &Node) -> Result<(), DatapathError> {
        info!(identity = %node.identity(), source = %node.source, "Datapath: node delete");
        Ok(())
    }

    fn node_validate_implementation(&self, node: &Node) -> Result<(), DatapathError> {
        debug!(identity = %node.identity(), "Datapath: node validate");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_core::Source;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl NodeHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn node_add(&self, _node: &Node) -> Result<(), DatapathError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn node_update(&self, _old: &Node, _new: &Node) -> Result<(), DatapathError> {
            Ok(())
        }

        fn node_delete(&self, _node: &Node) -> Result<(), DatapathError> {
            Ok(())
        }

        fn node_validate_implementation(&self, _node: &Node) -> Result<(), DatapathError> {
            Err(DatapathError::Unavailable("no routes".to_string()))
        }
    }

    #[tokio::test]
    async fn test_handlers_are_distinct() {
        let set = HandlerSet::default();
        let a: Arc<dyn NodeHandler> = Arc::new(Counting::default());
        let b: Arc<dyn NodeHandler> = Arc::new(Counting::default());

        assert!(set.insert(a.clone()).await);
        assert!(!set.insert(a.clone()).await);
        assert!(set.insert(b.clone()).await);
        assert_eq!(set.len().await, 2);

        assert!(set.remove(&a).await);
        assert!(!set.remove(&a).await);
        assert!(!set.contains(&a).await);
        assert!(set.contains(&b).await);
    }

    #[tokio::test]
    async fn test_for_each_reaches_every_handler() {
        let set = HandlerSet::default();
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());
        set.insert(first.clone()).await;
        set.insert(second.clone()).await;

        let node = Node::new(&Identity::new("c", "n"), Source::Local);
        set.for_each(|h| {
            let _ = h.node_add(&node);
            report(h, "validate", &node.identity(), h.node_validate_implementation(&node));
        })
        .await;

        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }
}
