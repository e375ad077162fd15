//! Linux key code helpers.
//!
//! All key handling in this crate works on raw evdev key codes (`KEY_*`
//! values from `linux/input-event-codes.h`). This module names them,
//! parses them from user-facing strings and folds left/right modifiers
//! together.

use evdev::Key;

/// Raw evdev key code.
pub type KeyCode = u16;

/// evdev key event values.
pub const KEY_RELEASE: i32 = 0;
pub const KEY_PRESS: i32 = 1;

/// Names accepted in hotkey strings, lowercase. Several aliases may map to
/// the same code; the first entry for a code is its canonical label.
const NAMED_KEYS: &[(&str, Key)] = &[
    // Modifiers
    ("ctrl", Key::KEY_LEFTCTRL),
    ("control", Key::KEY_LEFTCTRL),
    ("alt", Key::KEY_LEFTALT),
    ("shift", Key::KEY_LEFTSHIFT),
    ("super", Key::KEY_LEFTMETA),
    ("win", Key::KEY_LEFTMETA),
    ("cmd", Key::KEY_LEFTMETA),
    ("meta", Key::KEY_LEFTMETA),
    // Letters
    ("a", Key::KEY_A),
    ("b", Key::KEY_B),
    ("c", Key::KEY_C),
    ("d", Key::KEY_D),
    ("e", Key::KEY_E),
    ("f", Key::KEY_F),
    ("g", Key::KEY_G),
    ("h", Key::KEY_H),
    ("i", Key::KEY_I),
    ("j", Key::KEY_J),
    ("k", Key::KEY_K),
    ("l", Key::KEY_L),
    ("m", Key::KEY_M),
    ("n", Key::KEY_N),
    ("o", Key::KEY_O),
    ("p", Key::KEY_P),
    ("q", Key::KEY_Q),
    ("r", Key::KEY_R),
    ("s", Key::KEY_S),
    ("t", Key::KEY_T),
    ("u", Key::KEY_U),
    ("v", Key::KEY_V),
    ("w", Key::KEY_W),
    ("x", Key::KEY_X),
    ("y", Key::KEY_Y),
    ("z", Key::KEY_Z),
    // Numbers (top row)
    ("0", Key::KEY_0),
    ("1", Key::KEY_1),
    ("2", Key::KEY_2),
    ("3", Key::KEY_3),
    ("4", Key::KEY_4),
    ("5", Key::KEY_5),
    ("6", Key::KEY_6),
    ("7", Key::KEY_7),
    ("8", Key::KEY_8),
    ("9", Key::KEY_9),
    // Function keys
    ("f1", Key::KEY_F1),
    ("f2", Key::KEY_F2),
    ("f3", Key::KEY_F3),
    ("f4", Key::KEY_F4),
    ("f5", Key::KEY_F5),
    ("f6", Key::KEY_F6),
    ("f7", Key::KEY_F7),
    ("f8", Key::KEY_F8),
    ("f9", Key::KEY_F9),
    ("f10", Key::KEY_F10),
    ("f11", Key::KEY_F11),
    ("f12", Key::KEY_F12),
    // Navigation and editing
    ("enter", Key::KEY_ENTER),
    ("return", Key::KEY_ENTER),
    ("space", Key::KEY_SPACE),
    ("esc", Key::KEY_ESC),
    ("escape", Key::KEY_ESC),
    ("tab", Key::KEY_TAB),
    ("backspace", Key::KEY_BACKSPACE),
    ("delete", Key::KEY_DELETE),
    ("insert", Key::KEY_INSERT),
    ("home", Key::KEY_HOME),
    ("end", Key::KEY_END),
    ("pageup", Key::KEY_PAGEUP),
    ("pagedown", Key::KEY_PAGEDOWN),
    ("up", Key::KEY_UP),
    ("down", Key::KEY_DOWN),
    ("left", Key::KEY_LEFT),
    ("right", Key::KEY_RIGHT),
];

/// Labels used when rendering codes back to text.
fn canonical_label(code: KeyCode) -> Option<&'static str> {
    let label = match Key::new(code) {
        Key::KEY_LEFTCTRL | Key::KEY_RIGHTCTRL => "Ctrl",
        Key::KEY_LEFTALT | Key::KEY_RIGHTALT => "Alt",
        Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT => "Shift",
        Key::KEY_LEFTMETA | Key::KEY_RIGHTMETA => "Super",
        Key::KEY_ENTER => "Enter",
        Key::KEY_SPACE => "Space",
        Key::KEY_ESC => "Esc",
        Key::KEY_TAB => "Tab",
        Key::KEY_BACKSPACE => "Backspace",
        Key::KEY_DELETE => "Delete",
        Key::KEY_INSERT => "Insert",
        Key::KEY_HOME => "Home",
        Key::KEY_END => "End",
        Key::KEY_PAGEUP => "PageUp",
        Key::KEY_PAGEDOWN => "PageDown",
        Key::KEY_UP => "Up",
        Key::KEY_DOWN => "Down",
        Key::KEY_LEFT => "Left",
        Key::KEY_RIGHT => "Right",
        _ => return None,
    };
    Some(label)
}

/// Parse a single key name (case-insensitive) into a key code.
pub fn parse_key_name(name: &str) -> Option<KeyCode> {
    let name = name.trim().to_ascii_lowercase();
    NAMED_KEYS
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, key)| key.code())
}

/// Human-readable label for a key code, e.g. `Ctrl`, `L`, `F5`, `Up`.
pub fn key_label(code: KeyCode) -> String {
    if let Some(label) = canonical_label(code) {
        return label.to_string();
    }
    match NAMED_KEYS.iter().find(|(_, key)| key.code() == code) {
        Some((alias, _)) => alias.to_ascii_uppercase(),
        None => format!("KEY_{code:#x}"),
    }
}

/// Check if this code is a Ctrl/Alt/Shift/Super key on either side.
pub fn is_modifier(code: KeyCode) -> bool {
    matches!(
        Key::new(code),
        Key::KEY_LEFTCTRL
            | Key::KEY_RIGHTCTRL
            | Key::KEY_LEFTALT
            | Key::KEY_RIGHTALT
            | Key::KEY_LEFTSHIFT
            | Key::KEY_RIGHTSHIFT
            | Key::KEY_LEFTMETA
            | Key::KEY_RIGHTMETA
    )
}

/// Fold right-hand modifiers onto their left-hand equivalents.
pub fn canonical(code: KeyCode) -> KeyCode {
    match Key::new(code) {
        Key::KEY_RIGHTCTRL => Key::KEY_LEFTCTRL.code(),
        Key::KEY_RIGHTALT => Key::KEY_LEFTALT.code(),
        Key::KEY_RIGHTSHIFT => Key::KEY_LEFTSHIFT.code(),
        Key::KEY_RIGHTMETA => Key::KEY_LEFTMETA.code(),
        _ => code,
    }
}

/// Both physical codes that canonicalize to `code`.
pub fn both_sides(code: KeyCode) -> Vec<KeyCode> {
    match Key::new(canonical(code)) {
        Key::KEY_LEFTCTRL => vec![Key::KEY_LEFTCTRL.code(), Key::KEY_RIGHTCTRL.code()],
        Key::KEY_LEFTALT => vec![Key::KEY_LEFTALT.code(), Key::KEY_RIGHTALT.code()],
        Key::KEY_LEFTSHIFT => vec![Key::KEY_LEFTSHIFT.code(), Key::KEY_RIGHTSHIFT.code()],
        Key::KEY_LEFTMETA => vec![Key::KEY_LEFTMETA.code(), Key::KEY_RIGHTMETA.code()],
        _ => vec![code],
    }
}
