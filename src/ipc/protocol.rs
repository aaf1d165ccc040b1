//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::bindings::{BindingDraft, BindingId, BindingUpdate, KeyBinding, TableError};

/// Requests from the settings editor to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// List all bindings in order
    ListBindings,

    GetBinding { id: BindingId },

    /// Append a binding
    AddBinding { binding: BindingDraft },

    /// Append the placeholder binding
    AddTemplate,

    RemoveBinding { id: BindingId },

    /// Move positions `start..end` before position `to`
    MoveBindings { start: usize, end: usize, to: usize },

    ToggleBinding { id: BindingId },

    UpdateBinding { id: BindingId, update: BindingUpdate },
}

/// Responses from daemon to editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// The whole table, in order
    Bindings { bindings: Vec<KeyBinding> },

    /// A single fetched, added or updated binding
    Binding { binding: KeyBinding },

    Removed { id: BindingId },

    Toggled { id: BindingId, enabled: bool },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<TableError> for Response {
    fn from(err: TableError) -> Self {
        let code = match &err {
            TableError::NotFound(_) => "not_found",
            TableError::Commit(_) => "commit_failed",
            TableError::Load(_) => "load_failed",
            TableError::EmptyTarget
            | TableError::UnknownKey(_)
            | TableError::InvalidCombo(_)
            | TableError::InvalidRange { .. } => "invalid",
        };
        Response::error(code, err.to_string())
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether the event tap is installed
    pub tap_active: bool,

    /// Times the OS disabled the tap and it was re-enabled
    pub tap_reenables: u64,

    /// Bindings in the editable table
    pub binding_count: usize,

    /// Committed edits published since startup
    pub edit_revision: u64,

    /// Revision of the snapshot the tap is matching against
    pub snapshot_revision: u64,

    /// Whether the snapshot is being rebuilt right now
    pub refresh_in_progress: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            tap_active: false,
            tap_reenables: 0,
            binding_count: 0,
            edit_revision: 0,
            snapshot_revision: 0,
            refresh_in_progress: false,
            uptime_secs: 0,
        }
    }
}
