//! IPC module for editor-daemon communication

mod protocol;
mod server;

pub use server::{Server, ServerContext};
