//! Ordered binding table edited by the settings UI
//!
//! Every mutation is applied in memory, committed to the store and only
//! then announced on the change bus. A failed commit restores the previous
//! in-memory table so it never drifts from durable state.

use std::ops::Range;
use std::sync::Arc;

use tracing::{info, warn};

use crate::events::ChangeBus;
use crate::hotkey::is_known_key;

use super::model::{BindingDraft, BindingId, BindingUpdate, KeyBinding, KeyCombo};
use super::store::{BindingStore, StoreError};

/// Errors reported to the editor
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("binding {0} not found")]
    NotFound(BindingId),

    #[error("application path must not be empty")]
    EmptyTarget,

    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("invalid key combination: {0}")]
    InvalidCombo(#[from] super::model::ComboParseError),

    #[error("cannot move {from:?} to {to} in a table of {len}")]
    InvalidRange {
        from: Range<usize>,
        to: usize,
        len: usize,
    },

    #[error("failed to save bindings: {0}")]
    Commit(#[source] StoreError),

    #[error("failed to load bindings: {0}")]
    Load(#[source] StoreError),
}

/// The editable table of keybindings
pub struct BindingTable {
    bindings: Vec<KeyBinding>,
    store: Arc<dyn BindingStore>,
    bus: ChangeBus,
    next_id: u64,
}

impl BindingTable {
    /// Load the table from the store
    pub fn open(store: Arc<dyn BindingStore>, bus: ChangeBus) -> Result<Self, TableError> {
        let mut bindings = store.load().map_err(TableError::Load)?;
        bindings.sort_by_key(|b| b.order);
        renumber(&mut bindings);

        let next_id = bindings.iter().map(|b| b.id.0 + 1).max().unwrap_or(1);
        info!(count = bindings.len(), "binding table loaded");

        Ok(Self {
            bindings,
            store,
            bus,
            next_id,
        })
    }

    /// All bindings ordered by `order`
    pub fn list(&self) -> &[KeyBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn get(&self, id: BindingId) -> Result<&KeyBinding, TableError> {
        self.bindings
            .iter()
            .find(|b| b.id == id)
            .ok_or(TableError::NotFound(id))
    }

    /// Append a new binding at the end of the order
    pub fn insert(&mut self, draft: BindingDraft) -> Result<KeyBinding, TableError> {
        validate_target(&draft.target)?;
        validate_key(&draft.key)?;

        let binding = KeyBinding {
            id: BindingId(self.next_id),
            target: draft.target,
            modifiers: draft.modifiers,
            key: draft.key,
            enabled: draft.enabled,
            order: self.bindings.len() as u32,
        };

        self.mutate(|bindings| {
            bindings.push(binding.clone());
            Ok(())
        })?;
        self.next_id += 1;

        info!(id = %binding.id, app = %binding.target, "binding added");
        Ok(binding)
    }

    /// Append the editor's placeholder binding
    pub fn insert_template(&mut self) -> Result<KeyBinding, TableError> {
        self.insert(BindingDraft::template())
    }

    pub fn remove(&mut self, id: BindingId) -> Result<KeyBinding, TableError> {
        let index = self.index_of(id)?;
        let removed = self.bindings[index].clone();

        self.mutate(|bindings| {
            bindings.remove(index);
            Ok(())
        })?;

        info!(%id, app = %removed.target, "binding removed");
        Ok(removed)
    }

    /// Move the bindings at positions `from` so they sit before position `to`.
    ///
    /// `to` is an offset into the table as it was before the move, so
    /// moving `0..1` to `len` sends the first binding to the end. Afterwards
    /// `order` is renumbered to exactly `0..len`.
    pub fn reorder(&mut self, from: Range<usize>, to: usize) -> Result<(), TableError> {
        let len = self.bindings.len();
        if from.start >= from.end || from.end > len || to > len {
            return Err(TableError::InvalidRange { from, to, len });
        }

        self.mutate(|bindings| {
            let moved: Vec<KeyBinding> = bindings.drain(from.clone()).collect();
            let insert_at = if to > from.start {
                to.saturating_sub(moved.len()).max(from.start)
            } else {
                to
            };
            bindings.splice(insert_at..insert_at, moved);
            Ok(())
        })?;

        info!(?from, to, "bindings reordered");
        Ok(())
    }

    /// Flip `enabled`, returning the new value
    pub fn toggle(&mut self, id: BindingId) -> Result<bool, TableError> {
        let index = self.index_of(id)?;
        let enabled = !self.bindings[index].enabled;

        self.mutate(|bindings| {
            bindings[index].enabled = enabled;
            Ok(())
        })?;

        info!(%id, enabled, "binding toggled");
        Ok(enabled)
    }

    pub fn update(&mut self, id: BindingId, update: BindingUpdate) -> Result<KeyBinding, TableError> {
        let index = self.index_of(id)?;

        let mut updated = self.bindings[index].clone();
        if let Some(target) = update.target {
            validate_target(&target)?;
            updated.target = target;
        }
        if let Some(modifiers) = update.modifiers {
            updated.modifiers = modifiers;
        }
        if let Some(key) = update.key {
            validate_key(&key)?;
            updated.key = key;
        }
        if let Some(enabled) = update.enabled {
            updated.enabled = enabled;
        }
        if let Some(text) = update.combo {
            let combo: KeyCombo = text.parse()?;
            updated.modifiers = combo.modifiers;
            updated.key = combo.key;
        }

        let result = updated.clone();
        self.mutate(move |bindings| {
            bindings[index] = updated;
            Ok(())
        })?;

        info!(%id, combo = %result.combo(), enabled = result.enabled, "binding updated");
        Ok(result)
    }

    fn index_of(&self, id: BindingId) -> Result<usize, TableError> {
        self.bindings
            .iter()
            .position(|b| b.id == id)
            .ok_or(TableError::NotFound(id))
    }

    /// Apply `change`, renumber, commit, then publish.
    fn mutate<F>(&mut self, change: F) -> Result<(), TableError>
    where
        F: FnOnce(&mut Vec<KeyBinding>) -> Result<(), TableError>,
    {
        let previous = self.bindings.clone();
        change(&mut self.bindings)?;
        renumber(&mut self.bindings);

        if let Err(e) = self.store.commit(&self.bindings) {
            warn!(error = %e, "commit failed, discarding edit");
            self.bindings = previous;
            return Err(TableError::Commit(e));
        }

        self.bus.publish();
        Ok(())
    }
}

fn renumber(bindings: &mut [KeyBinding]) {
    for (order, binding) in bindings.iter_mut().enumerate() {
        binding.order = order as u32;
    }
}

fn validate_target(target: &str) -> Result<(), TableError> {
    if target.trim().is_empty() {
        return Err(TableError::EmptyTarget);
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), TableError> {
    if !is_known_key(key) {
        return Err(TableError::UnknownKey(key.to_string()));
    }
    Ok(())
}
