//! Hotkey engine: tap lifecycle and the per-event matching algorithm
//!
//! The OS-facing tap converts raw events into [`TapEvent`]s and forwards
//! them to a [`TapHandler`]. [`Matcher`] is the handler; it never blocks,
//! reading bindings from the lock-free cache and queueing launches with
//! `try_send`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::bindings::BindingCache;
use crate::launch::LaunchDispatcher;

use super::keys::{code_to_key, decode_modifiers};

/// A keyboard event as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapEvent {
    /// A key was pressed
    KeyDown { code: u16, flags: u64 },
    /// The OS disabled the tap
    TapDisabled { timeout: bool },
    /// Any other event type
    Other,
}

/// What the tap should do with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapDecision {
    /// Deliver the event unchanged
    PassThrough,
    /// Suppress the event
    Consume,
    /// Re-enable the tap, then deliver the event unchanged
    ReenableAndPass,
}

/// Receives every event from an installed tap.
///
/// Runs on the tap thread and must return quickly.
pub trait TapHandler: Send + Sync {
    fn handle(&self, event: TapEvent) -> TapDecision;
}

/// A session-wide keyboard interception point
pub trait EventTap: Send {
    /// Install the tap and start delivering events to `handler`
    fn install(&mut self, handler: Arc<dyn TapHandler>) -> Result<(), HotkeyError>;

    /// Remove the tap and release its OS resources
    fn remove(&mut self);
}

/// Errors that can occur when starting the hotkey engine
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to create run loop source for event tap")]
    RunLoopSource,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("listener thread exited before reporting")]
    ListenerGone,

    #[error("global hotkeys are not supported on this platform")]
    Unsupported,
}

/// Whether the OS tap is installed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TapState {
    #[default]
    Stopped,
    Active,
}

impl std::fmt::Display for TapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapState::Stopped => write!(f, "Stopped"),
            TapState::Active => write!(f, "Active"),
        }
    }
}

/// Tap health shared with status reporting
#[derive(Debug, Default)]
pub struct TapStatus {
    active: AtomicBool,
    reenables: AtomicU64,
}

impl TapStatus {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Times the OS disabled the tap and it was re-enabled
    pub fn reenables(&self) -> u64 {
        self.reenables.load(Ordering::Relaxed)
    }
}

/// Matches key-down events against the cached bindings
pub struct Matcher {
    cache: BindingCache,
    dispatcher: LaunchDispatcher,
    status: Arc<TapStatus>,
}

impl Matcher {
    pub fn new(cache: BindingCache, dispatcher: LaunchDispatcher) -> Self {
        Self {
            cache,
            dispatcher,
            status: Arc::new(TapStatus::default()),
        }
    }
}

impl TapHandler for Matcher {
    fn handle(&self, event: TapEvent) -> TapDecision {
        let (code, flags) = match event {
            TapEvent::TapDisabled { timeout } => {
                // Still on the tap thread: count it, keep logging at debug
                self.status.reenables.fetch_add(1, Ordering::Relaxed);
                debug!(timeout, "event tap disabled by the system, re-enabling");
                return TapDecision::ReenableAndPass;
            }
            TapEvent::Other => return TapDecision::PassThrough,
            TapEvent::KeyDown { code, flags } => (code, flags),
        };

        let Some(key) = code_to_key(code) else {
            return TapDecision::PassThrough;
        };
        let modifiers = decode_modifiers(flags);
        if modifiers.is_empty() {
            return TapDecision::PassThrough;
        }

        let snapshot = self.cache.current();
        let Some(binding) = snapshot.find_match(key, modifiers) else {
            return TapDecision::PassThrough;
        };

        debug!(id = %binding.id, combo = %binding.combo(), "hotkey matched");
        // The user asked for this combination; swallow it even if the
        // launch queue is full
        self.dispatcher.dispatch(binding);
        TapDecision::Consume
    }
}

/// Owns the OS tap and its Stopped/Active lifecycle
pub struct HotkeyEngine {
    matcher: Arc<Matcher>,
    tap: Box<dyn EventTap>,
    state: TapState,
    status: Arc<TapStatus>,
}

impl HotkeyEngine {
    pub fn new(matcher: Matcher, tap: Box<dyn EventTap>) -> Self {
        let status = Arc::clone(&matcher.status);
        Self {
            matcher: Arc::new(matcher),
            tap,
            state: TapState::Stopped,
            status,
        }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    /// Shared view of the tap's health, for status reporting
    pub fn status(&self) -> Arc<TapStatus> {
        Arc::clone(&self.status)
    }

    /// Install the tap. A no-op when already active.
    ///
    /// Installation failure usually means the Accessibility permission is
    /// missing; the engine stays stopped and the error is returned.
    pub fn start(&mut self) -> Result<(), HotkeyError> {
        if self.state == TapState::Active {
            return Ok(());
        }

        let handler: Arc<dyn TapHandler> = self.matcher.clone();
        self.tap.install(handler)?;

        self.state = TapState::Active;
        self.status.active.store(true, Ordering::SeqCst);
        info!("hotkey engine started");
        Ok(())
    }

    /// Remove the tap. A no-op when already stopped.
    pub fn stop(&mut self) {
        if self.state == TapState::Stopped {
            return;
        }

        self.tap.remove();
        self.state = TapState::Stopped;
        self.status.active.store(false, Ordering::SeqCst);
        info!("hotkey engine stopped");
    }
}

impl Drop for HotkeyEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
