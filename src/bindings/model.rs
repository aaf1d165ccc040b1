//! Keybinding records and key combination parsing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hotkey::{is_known_key, Modifier, ModifierSet};

/// Stable identity of a binding within a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One user-configured shortcut
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBinding {
    pub id: BindingId,
    /// Path of the application to launch
    pub target: String,
    pub modifiers: ModifierSet,
    /// Canonical single-letter key name
    pub key: String,
    pub enabled: bool,
    /// Display and match order, contiguous from 0
    pub order: u32,
}

impl KeyBinding {
    /// Whether the binding can ever match an event
    pub fn is_active(&self) -> bool {
        self.enabled && !self.modifiers.is_empty() && !self.target.is_empty()
    }

    /// Whether an event with the given key and modifiers triggers this binding
    pub fn matches(&self, key: &str, modifiers: ModifierSet) -> bool {
        self.is_active() && self.key == key && self.modifiers == modifiers
    }

    pub fn combo(&self) -> KeyCombo {
        KeyCombo {
            modifiers: self.modifiers,
            key: self.key.clone(),
        }
    }
}

/// Fields of a binding supplied by the editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDraft {
    pub target: String,
    #[serde(default)]
    pub modifiers: ModifierSet,
    pub key: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl BindingDraft {
    /// The placeholder inserted by the editor's "add" action.
    ///
    /// It has no modifiers and starts disabled, so it never matches until
    /// the user fills it in.
    pub fn template() -> Self {
        Self {
            target: "New Application".to_string(),
            modifiers: ModifierSet::default(),
            key: "a".to_string(),
            enabled: false,
        }
    }
}

/// Partial update of an existing binding; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<ModifierSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Combination text such as `option+command+t`; overrides `modifiers`
    /// and `key` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combo: Option<String>,
}

/// A key plus the modifiers that must be held with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    pub modifiers: ModifierSet,
    pub key: String,
}

/// Errors from parsing combination text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComboParseError {
    #[error("key combination is empty")]
    Empty,

    #[error("key combination has no key")]
    MissingKey,

    #[error("key combination has more than one key: {0} and {1}")]
    MultipleKeys(String, String),

    #[error("unknown key: {0}")]
    UnknownKey(String),
}

impl FromStr for KeyCombo {
    type Err = ComboParseError;

    /// Parse text like `Option+Command+T` or `cmd-opt-t`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s
            .split(['+', '-'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(ComboParseError::Empty);
        }

        let mut modifiers = ModifierSet::default();
        let mut key: Option<String> = None;
        for token in tokens {
            if let Some(modifier) = Modifier::parse(token) {
                modifiers.insert(modifier);
                continue;
            }
            let name = token.to_ascii_lowercase();
            if !is_known_key(&name) {
                return Err(ComboParseError::UnknownKey(token.to_string()));
            }
            if let Some(existing) = key {
                return Err(ComboParseError::MultipleKeys(existing, name));
            }
            key = Some(name);
        }

        let key = key.ok_or(ComboParseError::MissingKey)?;
        Ok(Self { modifiers, key })
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in self.modifiers.iter() {
            write!(f, "{}+", m)?;
        }
        f.write_str(&self.key)
    }
}
