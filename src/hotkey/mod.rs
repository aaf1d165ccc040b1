//! Hotkey module for global keyboard event interception
//!
//! Uses a macOS CGEventTap to observe key-down events, match them against
//! the cached bindings and suppress the ones that trigger a launch.

mod engine;
mod keys;
mod listener;

pub use engine::{HotkeyEngine, Matcher, TapStatus};
pub use keys::{is_known_key, Modifier, ModifierSet};
pub use listener::system_tap;
