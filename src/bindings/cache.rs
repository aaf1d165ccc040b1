//! Read-optimized snapshot of the binding table for the event tap
//!
//! The tap callback reads the current snapshot through an `ArcSwap`, which
//! never blocks. Refreshes run on the tokio runtime, read the durable store
//! on the blocking pool and swap in a whole new snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::ChangeNotification;
use crate::hotkey::ModifierSet;

use super::model::KeyBinding;
use super::store::{BindingStore, StoreError};

/// Immutable point-in-time copy of the binding table
#[derive(Debug, Default)]
pub struct Snapshot {
    bindings: Vec<KeyBinding>,
    revision: u64,
}

impl Snapshot {
    pub fn new(mut bindings: Vec<KeyBinding>, revision: u64) -> Self {
        bindings.sort_by_key(|b| b.order);
        Self { bindings, revision }
    }

    #[cfg(test)]
    pub fn bindings(&self) -> &[KeyBinding] {
        &self.bindings
    }

    /// Number of successful refreshes that produced this snapshot
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// First active binding in order whose key and modifier set match
    pub fn find_match(&self, key: &str, modifiers: ModifierSet) -> Option<&KeyBinding> {
        self.bindings.iter().find(|b| b.matches(key, modifiers))
    }
}

/// Errors from refreshing the snapshot
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to read bindings: {0}")]
    Load(#[from] StoreError),

    #[error("refresh task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result of a refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This call swapped in a new snapshot
    Refreshed { revision: u64 },
    /// Another refresh was running; it will make one more pass
    Coalesced,
}

struct CacheInner {
    snapshot: ArcSwap<Snapshot>,
    store: Arc<dyn BindingStore>,
    refreshing: AtomicBool,
    pending: AtomicBool,
}

/// Shared handle to the binding snapshot
#[derive(Clone)]
pub struct BindingCache {
    inner: Arc<CacheInner>,
}

impl BindingCache {
    /// Create a cache with an empty snapshot; call [`refresh`](Self::refresh)
    /// to populate it
    pub fn new(store: Arc<dyn BindingStore>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                snapshot: ArcSwap::from_pointee(Snapshot::default()),
                store,
                refreshing: AtomicBool::new(false),
                pending: AtomicBool::new(false),
            }),
        }
    }

    /// Latest snapshot. Lock-free, safe to call from the tap callback.
    pub fn current(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn revision(&self) -> u64 {
        self.inner.snapshot.load().revision()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::SeqCst)
    }

    /// Re-read the store and replace the snapshot.
    ///
    /// At most one refresh runs at a time. A call that arrives while one is
    /// running returns [`RefreshOutcome::Coalesced`] and marks the running
    /// refresh to read the store once more before it finishes.
    pub async fn refresh(&self) -> Result<RefreshOutcome, CacheError> {
        let inner = &self.inner;
        // Announce the request before trying to take ownership, so a running
        // refresh that releases after our swap is guaranteed to see it
        inner.pending.store(true, Ordering::SeqCst);
        if inner.refreshing.swap(true, Ordering::SeqCst) {
            debug!("refresh already running, coalesced");
            return Ok(RefreshOutcome::Coalesced);
        }

        let mut revision = inner.snapshot.load().revision();
        loop {
            inner.pending.store(false, Ordering::SeqCst);

            match self.load().await {
                Ok(bindings) => {
                    revision += 1;
                    let count = bindings.len();
                    inner.snapshot.store(Arc::new(Snapshot::new(bindings, revision)));
                    debug!(revision, count, "binding snapshot swapped");
                }
                Err(e) => {
                    inner.refreshing.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }

            if inner.pending.load(Ordering::SeqCst) {
                continue;
            }
            inner.refreshing.store(false, Ordering::SeqCst);

            // A request may have landed between the check and the release;
            // pick it up unless another caller already has.
            if inner.pending.load(Ordering::SeqCst) && !inner.refreshing.swap(true, Ordering::SeqCst) {
                continue;
            }
            return Ok(RefreshOutcome::Refreshed { revision });
        }
    }

    async fn load(&self) -> Result<Vec<KeyBinding>, CacheError> {
        let store = Arc::clone(&self.inner.store);
        let bindings = tokio::task::spawn_blocking(move || store.load()).await??;
        Ok(bindings)
    }

    /// Refresh on every change notification until the bus closes.
    ///
    /// Failures are logged and the stale snapshot keeps serving; the next
    /// notification triggers another attempt.
    pub async fn run(self, mut notifications: broadcast::Receiver<ChangeNotification>) {
        info!("binding cache refresh worker started");

        loop {
            match notifications.recv().await {
                Ok(event) => debug!(%event, "change notification received"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "change notifications lagged, refreshing once");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }

            // Collapse a burst of notifications into one read
            while notifications.try_recv().is_ok() {}

            match self.refresh().await {
                Ok(RefreshOutcome::Refreshed { revision }) => {
                    info!(revision, "binding cache refreshed");
                }
                Ok(RefreshOutcome::Coalesced) => {}
                Err(e) => {
                    warn!(error = %e, "binding cache refresh failed, keeping stale snapshot");
                }
            }
        }

        info!("binding cache refresh worker stopped");
    }
}
