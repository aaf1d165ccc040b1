//! Application launching, kept off the event tap thread
//!
//! The tap callback only enqueues a [`LaunchRequest`] with `try_send`; a
//! tokio task drains the queue and asks the OS to open each application,
//! one at a time, so the queue bound holds while a launch is slow.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bindings::{BindingId, KeyBinding};

/// A request to open one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub binding: BindingId,
    pub target: PathBuf,
}

/// Errors from opening an application
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("application not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to run opener: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("opener exited with {0}")]
    Exit(std::process::ExitStatus),

    #[error("launch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Something that can open an application bundle
pub trait Launcher: Send + Sync + 'static {
    fn open(&self, target: &Path) -> Result<(), LaunchError>;
}

/// Opens applications through the desktop's opener command
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

#[cfg(target_os = "macos")]
const OPENER: &str = "open";
#[cfg(not(target_os = "macos"))]
const OPENER: &str = "xdg-open";

impl Launcher for SystemLauncher {
    fn open(&self, target: &Path) -> Result<(), LaunchError> {
        if !target.exists() {
            return Err(LaunchError::NotFound(target.to_owned()));
        }

        let status = Command::new(OPENER).arg(target).status()?;
        if !status.success() {
            return Err(LaunchError::Exit(status));
        }
        Ok(())
    }
}

/// Non-blocking handle used by the tap callback to request launches
#[derive(Debug, Clone)]
pub struct LaunchDispatcher {
    tx: mpsc::Sender<LaunchRequest>,
}

impl LaunchDispatcher {
    /// Create a dispatcher and the receiving end for [`LaunchWorker::run`]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LaunchRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a launch without blocking. Returns false if the request was
    /// dropped because the queue is full or the worker is gone.
    pub fn dispatch(&self, binding: &KeyBinding) -> bool {
        let request = LaunchRequest {
            binding: binding.id,
            target: PathBuf::from(&binding.target),
        };
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!(path = ?request.target, "launch queue full, dropping request");
                false
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                warn!(path = ?request.target, "launch worker stopped, dropping request");
                false
            }
        }
    }
}

/// Drains launch requests and opens each application
pub struct LaunchWorker;

impl LaunchWorker {
    pub async fn run(mut rx: mpsc::Receiver<LaunchRequest>, launcher: Arc<dyn Launcher>) {
        info!("launch worker started");

        while let Some(request) = rx.recv().await {
            match Self::launch(&request, Arc::clone(&launcher)).await {
                Ok(()) => info!(binding = %request.binding, path = ?request.target, "application launched"),
                Err(e) => warn!(
                    binding = %request.binding,
                    path = ?request.target,
                    error = %e,
                    "application launch failed"
                ),
            }
        }

        info!("launch worker stopped");
    }

    async fn launch(request: &LaunchRequest, launcher: Arc<dyn Launcher>) -> Result<(), LaunchError> {
        debug!(path = ?request.target, "opening application");
        let target = request.target.clone();
        tokio::task::spawn_blocking(move || launcher.open(&target)).await?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::hotkey::ModifierSet;

    #[derive(Default)]
    struct RecordingLauncher {
        opened: Mutex<Vec<PathBuf>>,
    }

    impl Launcher for RecordingLauncher {
        fn open(&self, target: &Path) -> Result<(), LaunchError> {
            self.opened.lock().unwrap().push(target.to_owned());
            if target.ends_with("missing.app") {
                return Err(LaunchError::NotFound(target.to_owned()));
            }
            Ok(())
        }
    }

    fn binding(id: u64, target: &str) -> KeyBinding {
        KeyBinding {
            id: BindingId(id),
            target: target.to_string(),
            modifiers: ModifierSet::default(),
            key: "t".to_string(),
            enabled: true,
            order: 0,
        }
    }

    #[test]
    fn test_dispatch_is_non_blocking_when_full() {
        let (dispatcher, mut rx) = LaunchDispatcher::channel(1);
        assert!(dispatcher.dispatch(&binding(1, "/a.app")));
        assert!(!dispatcher.dispatch(&binding(2, "/b.app")));

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.binding, BindingId(1));
        assert_eq!(queued.target, PathBuf::from("/a.app"));
    }

    #[test]
    fn test_dispatch_after_worker_gone() {
        let (dispatcher, rx) = LaunchDispatcher::channel(4);
        drop(rx);
        assert!(!dispatcher.dispatch(&binding(1, "/a.app")));
    }

    #[tokio::test]
    async fn test_worker_survives_failed_launch() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (dispatcher, rx) = LaunchDispatcher::channel(4);
        let worker = tokio::spawn(LaunchWorker::run(rx, launcher.clone()));

        dispatcher.dispatch(&binding(1, "/gone/missing.app"));
        dispatcher.dispatch(&binding(2, "/Applications/kitty.app"));

        let opened = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if launcher.opened.lock().unwrap().len() == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(opened.is_ok());

        drop(dispatcher);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }

    /// Launcher whose first open blocks until released
    struct SlowLauncher {
        started: std::sync::mpsc::SyncSender<()>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
        opened: Mutex<Vec<PathBuf>>,
    }

    impl Launcher for SlowLauncher {
        fn open(&self, target: &Path) -> Result<(), LaunchError> {
            let first = self.opened.lock().unwrap().is_empty();
            self.opened.lock().unwrap().push(target.to_owned());
            if first {
                let _ = self.started.send(());
                let _ = self.release.lock().unwrap().recv();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_launch_keeps_queue_bounded() {
        let (started_tx, started_rx) = std::sync::mpsc::sync_channel(1);
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let launcher = Arc::new(SlowLauncher {
            started: started_tx,
            release: Mutex::new(release_rx),
            opened: Mutex::new(Vec::new()),
        });
        let (dispatcher, rx) = LaunchDispatcher::channel(1);
        let worker = tokio::spawn(LaunchWorker::run(rx, launcher.clone()));

        assert!(dispatcher.dispatch(&binding(1, "/a.app")));
        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .unwrap()
            .unwrap();

        // The worker is busy with the first launch: one request fits in the
        // queue and the next is refused
        assert!(dispatcher.dispatch(&binding(2, "/b.app")));
        assert!(!dispatcher.dispatch(&binding(3, "/c.app")));

        release_tx.send(()).unwrap();
        drop(dispatcher);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            *launcher.opened.lock().unwrap(),
            vec![PathBuf::from("/a.app"), PathBuf::from("/b.app")]
        );
    }

    #[test]
    fn test_system_launcher_rejects_missing_path() {
        let err = SystemLauncher
            .open(Path::new("/definitely/not/here.app"))
            .unwrap_err();
        assert!(matches!(err, LaunchError::NotFound(_)));
    }
}
