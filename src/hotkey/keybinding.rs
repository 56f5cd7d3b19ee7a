//! Shortcut strings (`"Ctrl+Shift+C"`) and their X11 keycode bindings.

use std::fmt;
use std::str::FromStr;

use x11rb::connection::Connection;
use x11rb::protocol::xproto;

use super::HotkeyError;

/// Core X11 modifier bits.
pub mod mask {
    pub const SHIFT: u16 = 0x0001;
    pub const CONTROL: u16 = 0x0004;
    /// Alt on every common layout.
    pub const MOD1: u16 = 0x0008;
    /// Super / Windows key.
    pub const MOD4: u16 = 0x0040;

    /// Bits that take part in matching; lock and button state is ignored.
    pub const RELEVANT: u16 = SHIFT | CONTROL | MOD1 | MOD4;
}

mod keysym {
    pub const TAB: u32 = 0xff09;
    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
    pub const SPACE: u32 = 0x0020;
    pub const GRAVE: u32 = 0x0060;
    pub const F1: u32 = 0xffbe;

    pub const SHIFT_L: u32 = 0xffe1;
    pub const SHIFT_R: u32 = 0xffe2;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const CONTROL_R: u32 = 0xffe4;
    pub const META_L: u32 = 0xffe7;
    pub const META_R: u32 = 0xffe8;
    pub const ALT_L: u32 = 0xffe9;
    pub const ALT_R: u32 = 0xffea;
    pub const SUPER_L: u32 = 0xffeb;
    pub const SUPER_R: u32 = 0xffec;
}

/// A parsed shortcut, independent of the keyboard layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    raw: String,
    modifiers: u16,
    keysym: u32,
    key_label: String,
}

impl Shortcut {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn modifiers(&self) -> u16 {
        self.modifiers
    }

    pub fn keysym(&self) -> u32 {
        self.keysym
    }

    /// Same key with Shift added; the reverse-direction chord.
    pub fn with_shift(&self) -> Self {
        Self {
            raw: format!("{}+Shift", self.raw),
            modifiers: self.modifiers | mask::SHIFT,
            ..self.clone()
        }
    }

    /// Display form with modifiers in a fixed order, e.g. `Ctrl+Shift+C`.
    pub fn label(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for (bit, name) in [
            (mask::CONTROL, "Ctrl"),
            (mask::MOD1, "Alt"),
            (mask::SHIFT, "Shift"),
            (mask::MOD4, "Super"),
        ] {
            if self.modifiers & bit != 0 {
                parts.push(name);
            }
        }
        parts.push(&self.key_label);
        parts.join("+")
    }

    /// Keysyms of the modifiers that keep a switch session open. Shift is
    /// excluded since it only flips direction.
    pub fn hold_keysyms(&self) -> Vec<u32> {
        let mut syms = Vec::new();
        if self.modifiers & mask::CONTROL != 0 {
            syms.extend([keysym::CONTROL_L, keysym::CONTROL_R]);
        }
        if self.modifiers & mask::MOD1 != 0 {
            syms.extend([keysym::ALT_L, keysym::ALT_R, keysym::META_L, keysym::META_R]);
        }
        if self.modifiers & mask::MOD4 != 0 {
            syms.extend([keysym::SUPER_L, keysym::SUPER_R]);
        }
        if syms.is_empty() {
            syms.extend([keysym::SHIFT_L, keysym::SHIFT_R]);
        }
        syms
    }

    /// Resolve against the current keyboard mapping.
    pub fn resolve(&self, keymap: &Keymap) -> Result<Binding, HotkeyError> {
        let keycode = keymap
            .keycode_for(self.keysym)
            .ok_or_else(|| HotkeyError::UnmappedKey(self.raw.clone()))?;
        Ok(Binding {
            raw: self.raw.clone(),
            modifiers: self.modifiers,
            keycode,
        })
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Shortcut {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| HotkeyError::InvalidShortcut {
            shortcut: s.to_string(),
            reason: why.to_string(),
        };

        let tokens: Vec<&str> = s.split('+').map(str::trim).collect();
        let Some((key, mods)) = tokens.split_last() else {
            return Err(invalid("empty"));
        };
        if key.is_empty() {
            return Err(invalid("missing key"));
        }

        let mut modifiers = 0;
        for m in mods {
            let bit = match m.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => mask::CONTROL,
                "alt" | "mod1" | "option" => mask::MOD1,
                "shift" => mask::SHIFT,
                "super" | "win" | "mod4" | "cmd" | "command" => mask::MOD4,
                other => return Err(invalid(&format!("unknown modifier {other:?}"))),
            };
            modifiers |= bit;
        }
        if modifiers & !mask::SHIFT == 0 {
            return Err(invalid("needs Ctrl, Alt or Super"));
        }

        let (keysym, key_label) = parse_key(key).ok_or_else(|| invalid("unknown key"))?;

        Ok(Self {
            raw: s.to_string(),
            modifiers,
            keysym,
            key_label,
        })
    }
}

fn parse_key(key: &str) -> Option<(u32, String)> {
    let lower = key.to_ascii_lowercase();
    let named = match lower.as_str() {
        "tab" => Some((keysym::TAB, "Tab")),
        "space" => Some((keysym::SPACE, "Space")),
        "return" | "enter" => Some((keysym::RETURN, "Enter")),
        "escape" | "esc" => Some((keysym::ESCAPE, "Esc")),
        "`" | "grave" | "backtick" => Some((keysym::GRAVE, "`")),
        _ => None,
    };
    if let Some((sym, label)) = named {
        return Some((sym, label.to_string()));
    }

    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        return (1..=12).contains(&n).then(|| (keysym::F1 + n - 1, format!("F{n}")));
    }

    let mut chars = lower.chars();
    match (chars.next(), chars.next()) {
        // Latin-1 keysyms equal their (lowercase) code points.
        (Some(c), None) if c.is_ascii_alphanumeric() => {
            Some((c as u32, c.to_ascii_uppercase().to_string()))
        }
        _ => None,
    }
}

/// A shortcut bound to a concrete keycode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub raw: String,
    pub modifiers: u16,
    pub keycode: u8,
}

impl Binding {
    /// Whether a key event with `keycode` and modifier `state` is this
    /// chord. Lock and button bits in `state` are ignored.
    pub fn matches(&self, keycode: u8, state: u16) -> bool {
        self.keycode == keycode && state & mask::RELEVANT == self.modifiers
    }

    /// Same key and modifiers, however either was spelled.
    pub fn same_chord(&self, other: &Binding) -> bool {
        self.keycode == other.keycode && self.modifiers == other.modifiers
    }
}

/// Snapshot of the server's keycode → keysym table.
#[derive(Debug, Clone)]
pub struct Keymap {
    min_keycode: u8,
    keysyms_per_keycode: u8,
    keysyms: Vec<u32>,
}

impl Keymap {
    pub fn new(min_keycode: u8, keysyms_per_keycode: u8, keysyms: Vec<u32>) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode,
            keysyms,
        }
    }

    pub fn from_connection<C: Connection>(conn: &C) -> Result<Self, HotkeyError> {
        let setup = conn.setup();
        let count = setup.max_keycode - setup.min_keycode + 1;
        let reply = xproto::get_keyboard_mapping(conn, setup.min_keycode, count)
            .map_err(|e| HotkeyError::X11(format!("get_keyboard_mapping: {e}")))?
            .reply()
            .map_err(|e| HotkeyError::X11(format!("get_keyboard_mapping reply: {e}")))?;

        Ok(Self::new(
            setup.min_keycode,
            reply.keysyms_per_keycode,
            reply.keysyms,
        ))
    }

    /// First keycode producing `keysym` in any column.
    pub fn keycode_for(&self, keysym: u32) -> Option<u8> {
        let per = usize::from(self.keysyms_per_keycode);
        if per == 0 {
            return None;
        }
        self.keysyms
            .chunks(per)
            .position(|syms| syms.contains(&keysym))
            .and_then(|index| u8::try_from(usize::from(self.min_keycode) + index).ok())
    }

    /// Every keycode producing any of `keysyms`.
    pub fn keycodes_for(&self, keysyms: &[u32]) -> Vec<u8> {
        let per = usize::from(self.keysyms_per_keycode);
        if per == 0 {
            return Vec::new();
        }
        self.keysyms
            .chunks(per)
            .enumerate()
            .filter(|(_, syms)| syms.iter().any(|s| keysyms.contains(s)))
            .filter_map(|(index, _)| u8::try_from(usize::from(self.min_keycode) + index).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keymap() -> Keymap {
        // keycode 8: Tab, 9: c/C, 10: Control_L, 11: Control_R, 12: Alt_L/Meta_L
        Keymap::new(
            8,
            2,
            vec![
                keysym::TAB,
                0,
                'c' as u32,
                'C' as u32,
                keysym::CONTROL_L,
                0,
                keysym::CONTROL_R,
                0,
                keysym::ALT_L,
                keysym::META_L,
            ],
        )
    }

    #[test]
    fn parses_default_shortcuts() {
        let tab: Shortcut = "Ctrl+Tab".parse().unwrap();
        assert_eq!(tab.modifiers(), mask::CONTROL);
        assert_eq!(tab.keysym(), keysym::TAB);

        let copy: Shortcut = "Ctrl+Shift+C".parse().unwrap();
        assert_eq!(copy.modifiers(), mask::CONTROL | mask::SHIFT);
        assert_eq!(copy.keysym(), 'c' as u32);
    }

    #[test]
    fn label_uses_canonical_order() {
        let s: Shortcut = "shift + super + ctrl + f5".parse().unwrap();
        assert_eq!(s.label(), "Ctrl+Shift+Super+F5");
        let s: Shortcut = "Alt+`".parse().unwrap();
        assert_eq!(s.label(), "Alt+`");
    }

    #[test]
    fn rejects_bad_shortcuts() {
        for bad in ["", "Ctrl+", "Tab", "Shift+Tab", "Hyper+Tab", "Ctrl+Banana", "Ctrl+F13"] {
            assert!(bad.parse::<Shortcut>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn reverse_chord_adds_shift() {
        let tab: Shortcut = "Ctrl+Tab".parse().unwrap();
        let rev = tab.with_shift();
        assert_eq!(rev.modifiers(), mask::CONTROL | mask::SHIFT);
        assert_eq!(rev.label(), "Ctrl+Shift+Tab");
    }

    #[test]
    fn hold_keys_follow_the_modifier() {
        let ctrl: Shortcut = "Ctrl+Tab".parse().unwrap();
        assert_eq!(keymap().keycodes_for(&ctrl.hold_keysyms()), vec![10, 11]);

        let alt: Shortcut = "Alt+Tab".parse().unwrap();
        assert_eq!(keymap().keycodes_for(&alt.hold_keysyms()), vec![12]);
    }

    #[test]
    fn resolves_against_keymap() {
        let copy: Shortcut = "Ctrl+Shift+C".parse().unwrap();
        let binding = copy.resolve(&keymap()).unwrap();
        assert_eq!(binding.keycode, 9);

        let f5: Shortcut = "Ctrl+F5".parse().unwrap();
        assert!(matches!(f5.resolve(&keymap()), Err(HotkeyError::UnmappedKey(_))));
    }

    #[test]
    fn binding_ignores_lock_bits() {
        let binding: Binding = "Ctrl+Tab".parse::<Shortcut>().unwrap().resolve(&keymap()).unwrap();
        // NumLock (Mod2) and CapsLock set.
        assert!(binding.matches(8, mask::CONTROL | 0x0010 | 0x0002));
        assert!(!binding.matches(8, mask::CONTROL | mask::SHIFT));
        assert!(!binding.matches(9, mask::CONTROL));
    }
}
