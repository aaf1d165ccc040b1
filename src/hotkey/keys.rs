//! Key code and modifier definitions
//!
//! Provides the static table between macOS ANSI key codes and canonical
//! key names, plus decoding of the raw CGEventFlags bitmask into a
//! [`ModifierSet`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Modifier key flag masks from macOS CGEventFlags
pub mod flags {
    /// Shift key modifier flag
    pub const SHIFT: u64 = 1 << 17;
    /// Control key modifier flag
    pub const CONTROL: u64 = 1 << 18;
    /// Option/Alt key modifier flag
    pub const OPTION: u64 = 1 << 19;
    /// Command key modifier flag
    pub const COMMAND: u64 = 1 << 20;
}

/// ANSI key codes for the letter keys, as reported by
/// `kCGKeyboardEventKeycode`.
const KEY_TABLE: [(u16, &str); 26] = [
    (0x00, "a"),
    (0x01, "s"),
    (0x02, "d"),
    (0x03, "f"),
    (0x04, "h"),
    (0x05, "g"),
    (0x06, "z"),
    (0x07, "x"),
    (0x08, "c"),
    (0x09, "v"),
    (0x0B, "b"),
    (0x0C, "q"),
    (0x0D, "w"),
    (0x0E, "e"),
    (0x0F, "r"),
    (0x10, "y"),
    (0x11, "t"),
    (0x1F, "o"),
    (0x20, "u"),
    (0x22, "i"),
    (0x23, "p"),
    (0x25, "l"),
    (0x26, "j"),
    (0x28, "k"),
    (0x2D, "n"),
    (0x2E, "m"),
];

/// Map a hardware key code to its canonical key name.
///
/// Unknown codes are not an error: the event is simply not a hotkey
/// candidate.
pub fn code_to_key(code: u16) -> Option<&'static str> {
    KEY_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Map a canonical key name back to its hardware key code
pub fn key_to_code(name: &str) -> Option<u16> {
    KEY_TABLE
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
}

/// Whether `name` is a canonical key known to the table
pub fn is_known_key(name: &str) -> bool {
    key_to_code(name).is_some()
}

/// A single modifier key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Option,
    Command,
    Shift,
    Control,
}

impl Modifier {
    /// Every modifier, in canonical display order
    pub const ALL: [Modifier; 4] = [
        Modifier::Control,
        Modifier::Option,
        Modifier::Shift,
        Modifier::Command,
    ];

    /// Canonical lowercase name
    pub fn name(self) -> &'static str {
        match self {
            Modifier::Option => "option",
            Modifier::Command => "command",
            Modifier::Shift => "shift",
            Modifier::Control => "control",
        }
    }

    /// Parse a modifier name, accepting the usual short aliases
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "option" | "opt" | "alt" => Some(Modifier::Option),
            "command" | "cmd" => Some(Modifier::Command),
            "shift" => Some(Modifier::Shift),
            "control" | "ctrl" | "ctl" => Some(Modifier::Control),
            _ => None,
        }
    }

    fn flag(self) -> u64 {
        match self {
            Modifier::Option => flags::OPTION,
            Modifier::Command => flags::COMMAND,
            Modifier::Shift => flags::SHIFT,
            Modifier::Control => flags::CONTROL,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of modifier keys held during an event or required by a binding.
///
/// Equality is set equality. Serialized as a list of modifier names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Modifier>", into = "Vec<Modifier>")]
pub struct ModifierSet {
    /// Option/Alt key is held
    pub option: bool,
    /// Command key is held
    pub command: bool,
    /// Shift key is held
    pub shift: bool,
    /// Control key is held
    pub control: bool,
}

impl ModifierSet {
    /// Build a set from a list of modifiers
    pub fn of(modifiers: &[Modifier]) -> Self {
        let mut set = Self::default();
        for m in modifiers {
            set.insert(*m);
        }
        set
    }

    pub fn insert(&mut self, modifier: Modifier) {
        *self.slot(modifier) = true;
    }

    pub fn contains(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Option => self.option,
            Modifier::Command => self.command,
            Modifier::Shift => self.shift,
            Modifier::Control => self.control,
        }
    }

    /// Check if no modifier is held
    pub fn is_empty(&self) -> bool {
        !self.option && !self.command && !self.shift && !self.control
    }

    /// Modifiers present, in canonical order
    pub fn iter(&self) -> impl Iterator<Item = Modifier> + '_ {
        Modifier::ALL.into_iter().filter(|m| self.contains(*m))
    }

    /// Re-encode as a CGEventFlags bitmask
    pub fn to_flags(&self) -> u64 {
        self.iter().fold(0, |acc, m| acc | m.flag())
    }

    fn slot(&mut self, modifier: Modifier) -> &mut bool {
        match modifier {
            Modifier::Option => &mut self.option,
            Modifier::Command => &mut self.command,
            Modifier::Shift => &mut self.shift,
            Modifier::Control => &mut self.control,
        }
    }
}

impl From<Vec<Modifier>> for ModifierSet {
    fn from(modifiers: Vec<Modifier>) -> Self {
        Self::of(&modifiers)
    }
}

impl From<ModifierSet> for Vec<Modifier> {
    fn from(set: ModifierSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for ModifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Modifier::name).collect();
        f.write_str(&names.join("+"))
    }
}

/// Decode a raw modifier bitmask from a keyboard event.
///
/// Only the four modifier bits are inspected; device-dependent and
/// non-coalesced bits are ignored.
pub fn decode_modifiers(raw_flags: u64) -> ModifierSet {
    ModifierSet {
        option: raw_flags & flags::OPTION != 0,
        command: raw_flags & flags::COMMAND != 0,
        shift: raw_flags & flags::SHIFT != 0,
        control: raw_flags & flags::CONTROL != 0,
    }
}
