//! The leader's keyboard hook on X11.
//!
//! Passive grabs catch the switch and copy chords. A passive grab ends as
//! soon as Tab goes up, so the first switch press also takes an active
//! keyboard grab; that is what lets us see the held modifier's release.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::UnboundedReceiver;
use x11rb::protocol::Event;

use super::keybinding::{Binding, Keymap, Shortcut, mask};
use super::x11::{X11Context, spawn_event_thread};
use super::{HotkeyError, KeyEvent};
use crate::config::ShortcutConfig;

/// Shortcuts resolved to keycodes for one keyboard mapping.
#[derive(Debug, Clone)]
pub struct KeyBindings {
    switch: Binding,
    /// `None` when the switch chord already holds Shift; it then only
    /// cycles forward.
    switch_reverse: Option<Binding>,
    copy: Option<Binding>,
    /// Keycodes whose release ends a switch session.
    hold_keycodes: Vec<u8>,
}

/// Meaning of one raw key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    Switch { reverse: bool },
    Copy,
    HoldReleased,
    Ignored,
}

impl KeyBindings {
    /// The switch shortcut must resolve. A bad copy shortcut only
    /// disables copying.
    pub fn resolve(shortcuts: &ShortcutConfig, keymap: &Keymap) -> Result<Self, HotkeyError> {
        let switch: Shortcut = shortcuts.tab_switch.parse()?;
        let switch_binding = switch.resolve(keymap)?;
        let switch_reverse = if switch.modifiers() & mask::SHIFT == 0 {
            Some(switch.with_shift().resolve(keymap)?)
        } else {
            tracing::warn!(shortcut = %shortcuts.tab_switch, "switch shortcut includes Shift, reverse cycling disabled");
            None
        };

        let copy = match shortcuts
            .copy_url
            .parse::<Shortcut>()
            .and_then(|s| s.resolve(keymap))
        {
            Ok(binding) if switch_reverse.as_ref().is_some_and(|r| r.same_chord(&binding)) => {
                tracing::warn!(shortcut = %shortcuts.copy_url, "copy shortcut collides with reverse switch, disabled");
                None
            }
            Ok(binding) => Some(binding),
            Err(e) => {
                tracing::warn!(error = %e, "copy shortcut disabled");
                None
            }
        };

        let hold_keycodes = keymap.keycodes_for(&switch.hold_keysyms());
        if hold_keycodes.is_empty() {
            tracing::warn!(shortcut = %shortcuts.tab_switch, "no keycode for the held modifier");
        }

        Ok(Self {
            switch: switch_binding,
            switch_reverse,
            copy,
            hold_keycodes,
        })
    }

    fn all(&self) -> impl Iterator<Item = &Binding> {
        [Some(&self.switch), self.switch_reverse.as_ref(), self.copy.as_ref()]
            .into_iter()
            .flatten()
    }

    pub fn classify(&self, press: bool, keycode: u8, state: u16) -> Classified {
        if !press {
            if self.hold_keycodes.contains(&keycode) {
                return Classified::HoldReleased;
            }
            return Classified::Ignored;
        }

        if self.switch_reverse.as_ref().is_some_and(|b| b.matches(keycode, state)) {
            Classified::Switch { reverse: true }
        } else if self.switch.matches(keycode, state) {
            Classified::Switch { reverse: false }
        } else if self.copy.as_ref().is_some_and(|b| b.matches(keycode, state)) {
            Classified::Copy
        } else {
            Classified::Ignored
        }
    }
}

pub struct X11Hook {
    ctx: X11Context,
    bindings: KeyBindings,
    /// Active keyboard grab for an in-progress switch.
    holding: bool,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl X11Hook {
    /// Connect, grab the shortcuts and start the event thread.
    ///
    /// Fails if there is no display or not a single chord could be
    /// grabbed.
    pub fn install(shortcuts: &ShortcutConfig) -> Result<(Self, UnboundedReceiver<Event>), HotkeyError> {
        let ctx = X11Context::connect()?;
        let keymap = Keymap::from_connection(&**ctx.conn())?;
        let bindings = KeyBindings::resolve(shortcuts, &keymap)?;

        let mut hook = Self {
            ctx,
            bindings,
            holding: false,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        };
        hook.grab_all()?;

        let (events, thread) = spawn_event_thread(hook.ctx.conn().clone(), hook.stop.clone())?;
        hook.thread = Some(thread);

        tracing::info!(
            switch = %hook.bindings.switch.raw,
            copy = ?hook.bindings.copy.as_ref().map(|b| &b.raw),
            "keyboard hook installed"
        );
        Ok((hook, events))
    }

    fn grab_all(&self) -> Result<(), HotkeyError> {
        let mut granted = 0;
        for binding in self.bindings.all() {
            if self.ctx.grab_key(binding)? {
                granted += 1;
            }
        }
        if granted == 0 {
            self.ungrab_all();
            return Err(HotkeyError::NoBindings);
        }
        Ok(())
    }

    fn ungrab_all(&self) {
        for binding in self.bindings.all() {
            self.ctx.ungrab_key(binding);
        }
    }

    /// Swap to new shortcuts. On failure the old grabs stay in place.
    pub fn rebind(&mut self, shortcuts: &ShortcutConfig) -> Result<(), HotkeyError> {
        let keymap = Keymap::from_connection(&**self.ctx.conn())?;
        let bindings = KeyBindings::resolve(shortcuts, &keymap)?;

        self.release_hold();
        self.ungrab_all();
        let previous = std::mem::replace(&mut self.bindings, bindings);

        if let Err(e) = self.grab_all() {
            tracing::warn!(error = %e, "new shortcuts could not be grabbed, restoring previous");
            self.bindings = previous;
            self.grab_all()?;
            return Err(e);
        }
        tracing::info!(switch = %self.bindings.switch.raw, "shortcuts rebound");
        Ok(())
    }

    /// Turn one X11 event into zero or more key events.
    pub fn classify(&mut self, event: &Event) -> Vec<KeyEvent> {
        let (press, keycode, state) = match event {
            Event::KeyPress(e) => (true, e.detail, u16::from(e.state)),
            Event::KeyRelease(e) => (false, e.detail, u16::from(e.state)),
            _ => return Vec::new(),
        };

        match self.bindings.classify(press, keycode, state) {
            Classified::Switch { reverse } => {
                let mut events = vec![KeyEvent::SwitchPressed { reverse }];
                if !self.holding && !self.begin_hold() {
                    // Modifier already up, or no grab: a single step.
                    events.push(KeyEvent::SwitchModifierReleased);
                }
                events
            }
            Classified::Copy => vec![KeyEvent::CopyUrlPressed],
            Classified::HoldReleased if self.holding => {
                self.release_hold();
                vec![KeyEvent::SwitchModifierReleased]
            }
            Classified::HoldReleased | Classified::Ignored => Vec::new(),
        }
    }

    fn begin_hold(&mut self) -> bool {
        match self.ctx.grab_keyboard() {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "keyboard grab failed");
                return false;
            }
        }

        // The modifier may have gone up before the grab landed.
        match self.ctx.any_key_down(&self.bindings.hold_keycodes) {
            Ok(true) => {
                self.holding = true;
                true
            }
            Ok(false) => {
                self.ctx.ungrab_keyboard();
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "query_keymap failed");
                self.ctx.ungrab_keyboard();
                false
            }
        }
    }

    /// Drop the active keyboard grab, if any.
    pub fn release_hold(&mut self) {
        if self.holding {
            self.ctx.ungrab_keyboard();
            self.holding = false;
        }
    }

    /// Remove every grab and stop the event thread. Idempotent.
    pub fn uninstall(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.release_hold();
        self.ungrab_all();
        self.stop.store(true, Ordering::Relaxed);
        if thread.join().is_err() {
            tracing::warn!("x11 event thread panicked");
        }
        tracing::info!("keyboard hook removed");
    }
}

impl Drop for X11Hook {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::keybinding::mask;

    const TAB: u8 = 23;
    const C: u8 = 54;
    const CONTROL_L: u8 = 37;
    const CONTROL_R: u8 = 105;

    fn keymap() -> Keymap {
        let mut syms = vec![0u32; 256];
        syms[usize::from(TAB)] = 0xff09;
        syms[usize::from(C)] = 'c' as u32;
        syms[usize::from(CONTROL_L)] = 0xffe3;
        syms[usize::from(CONTROL_R)] = 0xffe4;
        Keymap::new(0, 1, syms)
    }

    fn bindings() -> KeyBindings {
        KeyBindings::resolve(&ShortcutConfig::default(), &keymap()).unwrap()
    }

    #[test]
    fn switch_direction_follows_shift() {
        let b = bindings();
        assert_eq!(
            b.classify(true, TAB, mask::CONTROL),
            Classified::Switch { reverse: false }
        );
        assert_eq!(
            b.classify(true, TAB, mask::CONTROL | mask::SHIFT),
            Classified::Switch { reverse: true }
        );
    }

    #[test]
    fn copy_chord_is_recognised() {
        assert_eq!(
            bindings().classify(true, C, mask::CONTROL | mask::SHIFT),
            Classified::Copy
        );
        assert_eq!(bindings().classify(true, C, mask::CONTROL), Classified::Ignored);
    }

    #[test]
    fn either_control_release_ends_hold() {
        let b = bindings();
        assert_eq!(b.classify(false, CONTROL_L, mask::CONTROL), Classified::HoldReleased);
        assert_eq!(b.classify(false, CONTROL_R, mask::CONTROL), Classified::HoldReleased);
        assert_eq!(b.classify(false, TAB, mask::CONTROL), Classified::Ignored);
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        assert_eq!(bindings().classify(true, TAB, 0), Classified::Ignored);
        assert_eq!(bindings().classify(true, TAB, mask::MOD1), Classified::Ignored);
    }

    #[test]
    fn bad_copy_shortcut_only_disables_copy() {
        let shortcuts = ShortcutConfig {
            copy_url: "Ctrl+Nope".into(),
            ..ShortcutConfig::default()
        };
        let b = KeyBindings::resolve(&shortcuts, &keymap()).unwrap();
        assert!(b.copy.is_none());
        assert_eq!(
            b.classify(true, TAB, mask::CONTROL),
            Classified::Switch { reverse: false }
        );
    }

    #[test]
    fn bad_switch_shortcut_is_an_error() {
        let shortcuts = ShortcutConfig {
            tab_switch: "Tab".into(),
            ..ShortcutConfig::default()
        };
        assert!(matches!(
            KeyBindings::resolve(&shortcuts, &keymap()),
            Err(HotkeyError::InvalidShortcut { .. })
        ));
    }

    #[test]
    fn shifted_switch_chord_cycles_forward() {
        let shortcuts = ShortcutConfig {
            tab_switch: "Ctrl+Shift+Tab".into(),
            copy_url: "Ctrl+Shift+C".into(),
        };
        let b = KeyBindings::resolve(&shortcuts, &keymap()).unwrap();
        assert!(b.switch_reverse.is_none());
        assert_eq!(
            b.classify(true, TAB, mask::CONTROL | mask::SHIFT),
            Classified::Switch { reverse: false }
        );
        assert_eq!(b.all().count(), 2);
    }
}
