//! Fixed keystroke sequence detection.
//!
//! The pattern is an ordered list of individual key presses (not a chord).
//! Only press edges advance it; releases and auto-repeat are ignored.
//!
//! ```
//! use inputlock::pattern::{PatternMatcher, UnlockPattern};
//! use evdev::Key;
//!
//! let mut matcher = PatternMatcher::new(UnlockPattern::Arrows);
//! for key in [Key::KEY_UP, Key::KEY_UP, Key::KEY_DOWN, Key::KEY_DOWN] {
//!     assert!(!matcher.feed(key.code(), true));
//! }
//! assert!(matcher.feed(Key::KEY_ENTER.code(), true));
//! ```

use crate::error::{Error, Result};
use crate::keycode::{KeyCode, key_label};
use evdev::Key;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Maximum gap between two accepted keys of the pattern.
pub const PATTERN_TIMEOUT: Duration = Duration::from_secs(3);

/// The fixed sequences that can be chosen for a lock session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnlockPattern {
    /// Up, Up, Down, Down, Enter.
    #[default]
    Arrows,
    /// W, W, S, S, Enter.
    Wasd,
}

impl UnlockPattern {
    pub const ALL: [UnlockPattern; 2] = [UnlockPattern::Arrows, UnlockPattern::Wasd];

    /// Configuration id of this pattern.
    pub fn id(&self) -> &'static str {
        match self {
            UnlockPattern::Arrows => "arrows",
            UnlockPattern::Wasd => "wasd",
        }
    }

    /// The key codes that must be pressed, in order.
    pub fn sequence(&self) -> Vec<KeyCode> {
        let keys = match self {
            UnlockPattern::Arrows => [
                Key::KEY_UP,
                Key::KEY_UP,
                Key::KEY_DOWN,
                Key::KEY_DOWN,
                Key::KEY_ENTER,
            ],
            UnlockPattern::Wasd => [Key::KEY_W, Key::KEY_W, Key::KEY_S, Key::KEY_S, Key::KEY_ENTER],
        };
        keys.iter().map(|k| k.code()).collect()
    }

    /// Look up a pattern by id, falling back to the default for unknown ids.
    ///
    /// The second value is `true` when the fallback was used.
    pub fn from_id_or_default(id: &str) -> (Self, bool) {
        match id.parse() {
            Ok(pattern) => (pattern, false),
            Err(_) => {
                log::warn!(
                    "Unknown unlock pattern '{}', using '{}'",
                    id,
                    UnlockPattern::default().id()
                );
                (UnlockPattern::default(), true)
            }
        }
    }
}

impl FromStr for UnlockPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        UnlockPattern::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidPattern(s.to_string()))
    }
}

impl fmt::Display for UnlockPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.sequence().into_iter().map(key_label).collect();
        f.write_str(&labels.join(" → "))
    }
}

fn is_ignored_on_mismatch(code: KeyCode) -> bool {
    matches!(
        Key::new(code),
        Key::KEY_LEFTCTRL
            | Key::KEY_RIGHTCTRL
            | Key::KEY_LEFTALT
            | Key::KEY_RIGHTALT
            | Key::KEY_LEFTSHIFT
            | Key::KEY_RIGHTSHIFT
    )
}

/// Sequence detector for one device's key stream.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    sequence: Vec<KeyCode>,
    position: usize,
    last_accepted: Option<Instant>,
    timeout: Duration,
}

impl PatternMatcher {
    pub fn new(pattern: UnlockPattern) -> Self {
        Self::with_sequence(pattern.sequence(), PATTERN_TIMEOUT)
    }

    /// Build a matcher for an arbitrary non-empty sequence.
    pub fn with_sequence(sequence: Vec<KeyCode>, timeout: Duration) -> Self {
        debug_assert!(!sequence.is_empty());
        Self {
            sequence,
            position: 0,
            last_accepted: None,
            timeout,
        }
    }

    pub fn sequence(&self) -> &[KeyCode] {
        &self.sequence
    }

    /// Feed one key event. Returns `true` exactly when the sequence completes.
    pub fn feed(&mut self, code: KeyCode, is_press: bool) -> bool {
        self.feed_at(code, is_press, Instant::now())
    }

    /// [`feed`](Self::feed) with an explicit clock reading.
    pub fn feed_at(&mut self, code: KeyCode, is_press: bool, now: Instant) -> bool {
        if !is_press || self.sequence.is_empty() {
            return false;
        }

        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) > self.timeout && self.position > 0 {
                log::debug!("Pattern timed out at {}/{}", self.position, self.sequence.len());
                self.position = 0;
            }
        }

        if code == self.sequence[self.position] {
            self.position += 1;
            self.last_accepted = Some(now);
            log::debug!("Pattern progress {}/{}", self.position, self.sequence.len());
            if self.position == self.sequence.len() {
                self.position = 0;
                return true;
            }
        } else if !is_ignored_on_mismatch(code) {
            if self.position > 0 {
                log::debug!("Pattern interrupted at {}/{}", self.position, self.sequence.len());
            }
            self.position = 0;
        }
        false
    }

    /// Matched keys so far and total length.
    pub fn progress(&self) -> (usize, usize) {
        (self.position, self.sequence.len())
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.last_accepted = None;
    }
}
