//! Configuration loading and management

use std::path::PathBuf;
use anyhow::{Context, Result};

const DEFAULT_LAUNCH_QUEUE: usize = 16;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for the editor
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// JSON file holding the keybindings
    pub bindings_path: PathBuf,

    /// Pending launches buffered between the tap and the launch worker
    pub launch_queue: usize,
}

impl Config {
    /// Load configuration from environment and defaults
    ///
    /// `LAUNCHKEY_DATA_DIR` overrides the data directory and
    /// `LAUNCHKEY_LAUNCH_QUEUE` the launch queue capacity.
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("LAUNCHKEY_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(&home)
                    .join(".local")
                    .join("share")
                    .join("launchkey")
            }
        };

        let launch_queue = match std::env::var("LAUNCHKEY_LAUNCH_QUEUE") {
            Ok(value) => value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("invalid LAUNCHKEY_LAUNCH_QUEUE: {value}"))?,
            Err(_) => DEFAULT_LAUNCH_QUEUE,
        };

        Ok(Self::in_dir(data_dir, launch_queue))
    }

    fn in_dir(data_dir: PathBuf, launch_queue: usize) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            bindings_path: data_dir.join("bindings.json"),
            data_dir,
            launch_queue,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
