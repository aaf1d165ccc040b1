//! launchkey-daemon: launch applications from global hotkeys
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Global key-down interception via CGEventTap
//! - Matching against a user-editable table of keybindings
//! - Launching the bound application, off the tap thread
//! - IPC server for the settings editor
//!
//! The tap callback reads bindings from a lock-free snapshot that is
//! refreshed whenever the editor commits a change.

mod bindings;
mod config;
mod events;
mod hotkey;
mod ipc;
mod launch;
mod lifecycle;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bindings::{BindingCache, BindingStore, BindingTable, JsonFileStore};
use crate::config::Config;
use crate::events::ChangeBus;
use crate::hotkey::{system_tap, HotkeyEngine, Matcher};
use crate::ipc::{Server, ServerContext};
use crate::launch::{LaunchDispatcher, LaunchWorker, SystemLauncher};
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "launchkey-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.bindings_path, "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Editor -> cache: change notifications after every commit
    let bus = ChangeBus::new(64);

    let store: Arc<dyn BindingStore> = Arc::new(JsonFileStore::new(&config.bindings_path));
    let table = BindingTable::open(Arc::clone(&store), bus.clone())?;

    // Populate the snapshot before the tap sees any event
    let cache = BindingCache::new(store);
    if let Err(e) = cache.refresh().await {
        warn!(error = %e, "initial binding load failed, starting with no hotkeys");
    }
    let refresh_worker = tokio::spawn(cache.clone().run(bus.subscribe()));

    // Tap -> launch worker
    let (dispatcher, launch_rx) = LaunchDispatcher::channel(config.launch_queue);
    let launch_worker = tokio::spawn(LaunchWorker::run(launch_rx, Arc::new(SystemLauncher)));

    let mut engine = HotkeyEngine::new(Matcher::new(cache.clone(), dispatcher), system_tap());

    match engine.start() {
        Ok(()) => {
            info!(state = %engine.state(), "hotkey engine ready");
        }
        Err(e) => {
            error!(?e, "failed to start hotkey engine");
            warn!("continuing without hotkey support - check Accessibility permissions");
        }
    }

    let context = ServerContext::new(table, cache, bus, engine.status());
    let server = Server::new(&config.socket_path, context)?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts editor connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to register signal handlers"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    engine.stop();
    server.shutdown().await;
    refresh_worker.abort();
    launch_worker.abort();

    info!("launchkey-daemon stopped");

    Ok(())
}
