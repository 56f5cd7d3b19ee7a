//! Global keyboard hook, owned by the leader only.
//!
//! The platform shim ([`hook::X11Hook`]) turns raw X11 key events into
//! [`KeyEvent`]s and hands them to a [`KeyEventSink`], normally the
//! [`trigger::SwitchTrigger`].

pub mod focus;
pub mod hook;
pub mod keybinding;
pub mod trigger;
pub mod x11;

pub use hook::X11Hook;

#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("X11: {0}")]
    X11(String),
    #[error("invalid shortcut {shortcut:?}: {reason}")]
    InvalidShortcut { shortcut: String, reason: String },
    #[error("no key produces {0:?} on this keyboard")]
    UnmappedKey(String),
    #[error("none of the shortcuts could be grabbed")]
    NoBindings,
    #[error("spawn event thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// What the hook saw, already classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// The switch chord was pressed (or auto-repeated).
    SwitchPressed { reverse: bool },
    /// The modifier holding the session open went up.
    SwitchModifierReleased,
    CopyUrlPressed,
}

/// Receiver of hook events. Called on the main loop; must not block.
pub trait KeyEventSink {
    fn on_key_event(&mut self, event: KeyEvent);
}
