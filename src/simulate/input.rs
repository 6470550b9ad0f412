//! Synthetic input events posted into the application's event queue.

#![allow(missing_docs)]

use std::fmt;
use std::ops::BitOr;

/// Name of a widget inside the application (object-name style lookup path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(String);

impl WidgetId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WidgetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WidgetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Keys the simulator can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Delete,
    Backspace,
    Tab,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    F(u8),
}

/// Keyboard modifier bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const SHIFT: Self = Self(1);
    pub const CTRL: Self = Self(1 << 1);
    pub const ALT: Self = Self(1 << 2);
    pub const META: Self = Self(1 << 3);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = [
            (Self::SHIFT, "shift"),
            (Self::CTRL, "ctrl"),
            (Self::ALT, "alt"),
            (Self::META, "meta"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        f.write_str(&names.join("+"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// One synthetic event, as delivered to `Application::dispatch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Key {
        action: KeyAction,
        key: Key,
        modifiers: Modifiers,
    },
    Click {
        button: MouseButton,
        modifiers: Modifiers,
    },
    /// Replace the selection of a list or tree view.
    Select { rows: Vec<usize> },
    Focus,
}

impl InputEvent {
    /// Short label for logs and errors.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Key { .. } => "key",
            Self::Click { .. } => "click",
            Self::Select { .. } => "select",
            Self::Focus => "focus",
        }
    }

    pub fn is_key_press(&self, expected: Key) -> bool {
        matches!(self, Self::Key { action: KeyAction::Press, key, .. } if *key == expected)
    }
}

/// An event waiting in the application's posted-event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedEvent {
    pub target: WidgetId,
    pub event: InputEvent,
    /// Posting order, unique per loop.
    pub seq: u64,
}
