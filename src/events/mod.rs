//! Change notifications published after the binding table is committed
//!
//! The bus is a thin wrapper over a tokio broadcast channel. The editor side
//! publishes, the binding cache subscribes once at startup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events published on the change bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeNotification {
    /// A binding mutation was durably committed
    BindingsChanged {
        /// Sequence number of this notification, starting at 1
        revision: u64,
    },
}

impl std::fmt::Display for ChangeNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeNotification::BindingsChanged { revision } => {
                write!(f, "BINDINGS_CHANGED (#{})", revision)
            }
        }
    }
}

/// Process-wide publish/subscribe channel for binding changes
#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeNotification>,
    revision: Arc<AtomicU64>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            revision: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish a "bindings changed" event, returning its revision.
    ///
    /// Fire-and-forget: having no subscribers is not an error.
    pub fn publish(&self) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let event = ChangeNotification::BindingsChanged { revision };
        match self.tx.send(event) {
            Ok(receivers) => debug!(revision, receivers, "change notification published"),
            Err(_) => debug!(revision, "change notification published with no subscribers"),
        }
        revision
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.tx.subscribe()
    }

    /// Revision of the most recent publish, 0 if none
    pub fn last_revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}
