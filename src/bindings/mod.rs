//! Keybinding data: records, durable store, editable table and the
//! snapshot cache read by the event tap

mod cache;
mod model;
mod store;
mod table;

pub use cache::BindingCache;
pub use model::{BindingDraft, BindingId, BindingUpdate, KeyBinding};
pub use store::{BindingStore, JsonFileStore};
pub use table::{BindingTable, TableError};

#[cfg(test)]
pub use store::memory::MemoryStore;
