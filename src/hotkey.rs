//! Modifier-chord hotkeys.
//!
//! A [`Hotkey`] is a set of keys that must be held together, written as
//! `+`-separated names (`Ctrl+Alt+L`). Left and right modifiers are
//! interchangeable. A chord made only of modifiers is rejected, because it
//! would fire during ordinary typing.

use crate::error::{Error, Result};
use crate::keycode::{KeyCode, both_sides, canonical, is_modifier, key_label, parse_key_name};
use evdev::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Minimum interval between two firings of the same matcher.
pub const HOTKEY_DEBOUNCE: Duration = Duration::from_millis(500);

/// A validated key chord. Codes are stored canonicalized (left-hand modifiers).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hotkey {
    keys: BTreeSet<KeyCode>,
}

impl Hotkey {
    /// The chord used when configuration is missing or invalid.
    pub const DEFAULT: &'static str = "Ctrl+Alt+L";

    /// Parse a chord such as `ctrl+alt+l` or `Super+F12`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut keys = BTreeSet::new();
        for part in s.split('+') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::InvalidHotkey(format!("empty key name in '{s}'")));
            }
            let code = parse_key_name(part)
                .ok_or_else(|| Error::InvalidHotkey(format!("unknown key '{part}' in '{s}'")))?;
            keys.insert(canonical(code));
        }

        if !keys.iter().any(|code| !is_modifier(*code)) {
            return Err(Error::InvalidHotkey(format!(
                "'{s}' has no non-modifier key"
            )));
        }
        Ok(Self { keys })
    }

    /// Parse `s`, falling back to [`Hotkey::default`] if it is invalid.
    ///
    /// The second value is `true` when the fallback was used or the string
    /// was not already in canonical form, i.e. whenever the stored
    /// configuration should be rewritten.
    pub fn parse_or_default(s: &str) -> (Self, bool) {
        match Self::parse(s) {
            Ok(hotkey) => {
                let normalized = hotkey.to_string() != s;
                (hotkey, normalized)
            }
            Err(e) => {
                log::warn!("{}, using {}", e, Self::DEFAULT);
                (Self::default(), true)
            }
        }
    }

    /// Canonical codes of the chord.
    pub fn keys(&self) -> &BTreeSet<KeyCode> {
        &self.keys
    }

    /// Every physical code that may take part in the chord, both sides of
    /// each modifier included.
    pub fn allowed_keys(&self) -> BTreeSet<KeyCode> {
        self.keys.iter().flat_map(|code| both_sides(*code)).collect()
    }
}

impl Default for Hotkey {
    fn default() -> Self {
        let keys = [Key::KEY_LEFTCTRL, Key::KEY_LEFTALT, Key::KEY_L]
            .iter()
            .map(|k| k.code())
            .collect();
        Self { keys }
    }
}

impl FromStr for Hotkey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn display_rank(code: KeyCode) -> u8 {
    match Key::new(code) {
        Key::KEY_LEFTCTRL => 0,
        Key::KEY_LEFTALT => 1,
        Key::KEY_LEFTSHIFT => 2,
        Key::KEY_LEFTMETA => 3,
        _ => 4,
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<KeyCode> = self.keys.iter().copied().collect();
        codes.sort_by_key(|code| (display_rank(*code), *code));
        let labels: Vec<String> = codes.into_iter().map(key_label).collect();
        f.write_str(&labels.join("+"))
    }
}

/// When a completed chord fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Fire on the press that completes the chord.
    Press,
    /// Fire once every chord key has been released after the chord was
    /// complete. Immune to auto-repeat storms.
    #[default]
    Release,
}

/// Chord detector for one key stream.
#[derive(Debug, Clone)]
pub struct HotkeyMatcher {
    hotkey: Hotkey,
    mode: TriggerMode,
    pressed: BTreeSet<KeyCode>,
    /// The chord was complete and has not been fully released since.
    armed: bool,
    last_fired: Option<Instant>,
    debounce: Duration,
}

impl HotkeyMatcher {
    pub fn new(hotkey: Hotkey, mode: TriggerMode) -> Self {
        Self {
            hotkey,
            mode,
            pressed: BTreeSet::new(),
            armed: false,
            last_fired: None,
            debounce: HOTKEY_DEBOUNCE,
        }
    }

    pub fn hotkey(&self) -> &Hotkey {
        &self.hotkey
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    /// Feed one key event; auto-repeat counts as a press.
    /// Returns `true` when the chord fires.
    pub fn feed(&mut self, code: KeyCode, is_press: bool) -> bool {
        self.feed_at(code, is_press, Instant::now())
    }

    /// [`feed`](Self::feed) with an explicit clock reading.
    pub fn feed_at(&mut self, code: KeyCode, is_press: bool, now: Instant) -> bool {
        let code = canonical(code);

        if is_press {
            self.pressed.insert(code);
            if self.armed || !self.is_complete() {
                return false;
            }
            self.armed = true;
            return match self.mode {
                TriggerMode::Press => self.try_fire(now),
                TriggerMode::Release => false,
            };
        }

        self.pressed.remove(&code);
        if self.armed && self.hotkey.keys.is_disjoint(&self.pressed) {
            self.armed = false;
            if self.mode == TriggerMode::Release {
                return self.try_fire(now);
            }
        }
        false
    }

    fn is_complete(&self) -> bool {
        self.hotkey.keys.is_subset(&self.pressed)
    }

    fn try_fire(&mut self, now: Instant) -> bool {
        let debounced = self
            .last_fired
            .is_some_and(|last| now.saturating_duration_since(last) < self.debounce);
        if debounced {
            log::debug!("Hotkey {} suppressed by debounce", self.hotkey);
            return false;
        }
        self.last_fired = Some(now);
        true
    }

    /// Canonical codes currently held.
    pub fn pressed(&self) -> &BTreeSet<KeyCode> {
        &self.pressed
    }

    pub fn reset(&mut self) {
        self.pressed.clear();
        self.armed = false;
    }
}
