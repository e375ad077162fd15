//! Device enumeration and classification.
//!
//! Classification runs in strict priority order:
//!
//! 1. Multi-touch capabilities (at least two of `ABS_MT_POSITION_X`,
//!    `ABS_MT_POSITION_Y`, `ABS_MT_SLOT`, `ABS_MT_TRACKING_ID`) mean
//!    [`DeviceKind::Touchscreen`], whatever the name says.
//! 2. Name patterns from [`NamePatterns`], checked touchscreen, touchpad,
//!    keyboard, mouse in that order.
//! 3. Capability heuristics: three or more of the reference keyboard keys
//!    means a keyboard; relative or absolute axes plus a mouse button means
//!    a mouse.
//! 4. Otherwise [`DeviceKind::Unknown`].

use crate::backend::{InputBackend, RawDevice};
use crate::error::Result;
use evdev::{AbsoluteAxisType, Key};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

/// Semantic type of an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    Touchscreen,
    Touchpad,
    Unknown,
}

impl DeviceKind {
    /// All kinds, in display order.
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::Keyboard,
        DeviceKind::Mouse,
        DeviceKind::Touchscreen,
        DeviceKind::Touchpad,
        DeviceKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Keyboard => "keyboard",
            DeviceKind::Mouse => "mouse",
            DeviceKind::Touchscreen => "touchscreen",
            DeviceKind::Touchpad => "touchpad",
            DeviceKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DeviceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown device kind: {s}"))
    }
}

/// The capability bitmap of a device, reduced to what classification and
/// mirroring need.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// `EV_KEY` codes, including mouse buttons.
    pub keys: BTreeSet<u16>,
    /// `EV_REL` axis codes.
    pub relative_axes: BTreeSet<u16>,
    /// `EV_ABS` axis codes.
    pub absolute_axes: BTreeSet<u16>,
}

impl Capabilities {
    pub fn has_key(&self, key: Key) -> bool {
        self.keys.contains(&key.code())
    }

    pub fn has_absolute_axis(&self, axis: AbsoluteAxisType) -> bool {
        self.absolute_axes.contains(&axis.0)
    }

    pub fn has_relative(&self) -> bool {
        !self.relative_axes.is_empty()
    }

    pub fn has_absolute(&self) -> bool {
        !self.absolute_axes.is_empty()
    }
}

/// Immutable snapshot of one classified device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Device node, e.g. `/dev/input/event4`.
    pub path: PathBuf,
    /// Name reported by the kernel driver.
    pub name: String,
    /// Physical topology path, when the driver reports one.
    pub phys: Option<String>,
    pub vendor: u16,
    pub product: u16,
    pub capabilities: Capabilities,
    /// Inferred semantic type.
    pub kind: DeviceKind,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

const TOUCHSCREEN_AXES: [AbsoluteAxisType; 4] = [
    AbsoluteAxisType::ABS_MT_POSITION_X,
    AbsoluteAxisType::ABS_MT_POSITION_Y,
    AbsoluteAxisType::ABS_MT_SLOT,
    AbsoluteAxisType::ABS_MT_TRACKING_ID,
];

const REFERENCE_KEYBOARD_KEYS: [Key; 6] = [
    Key::KEY_A,
    Key::KEY_Z,
    Key::KEY_ENTER,
    Key::KEY_SPACE,
    Key::KEY_ESC,
    Key::KEY_LEFTCTRL,
];

// BTN_MOUSE shares code 0x110 with BTN_LEFT.
const MOUSE_BUTTONS: [Key; 3] = [Key::BTN_LEFT, Key::BTN_RIGHT, Key::BTN_MIDDLE];

/// Name-substring table used as the secondary classification signal.
///
/// Every pattern is compiled case-insensitively.
#[derive(Debug, Clone)]
pub struct NamePatterns {
    touchscreen: Vec<Regex>,
    touchpad: Vec<Regex>,
    keyboard: Vec<Regex>,
    mouse: Vec<Regex>,
}

impl NamePatterns {
    pub const DEFAULT_TOUCHSCREEN: &'static [&'static str] =
        &[r"touchscreen", r"touch.*screen", r"\bts\b"];
    pub const DEFAULT_TOUCHPAD: &'static [&'static str] =
        &[r"touchpad", r"synaptics", r"elan.*touchpad"];
    pub const DEFAULT_KEYBOARD: &'static [&'static str] =
        &[r"keyboard", r"keychron", r"logitech.*keyboard", r"kbd"];
    pub const DEFAULT_MOUSE: &'static [&'static str] =
        &[r"mouse", r"logitech.*mouse", r"pointing.*device"];

    /// Build a table from explicit pattern lists.
    pub fn new(
        touchscreen: &[&str],
        touchpad: &[&str],
        keyboard: &[&str],
        mouse: &[&str],
    ) -> std::result::Result<Self, regex::Error> {
        fn compile(patterns: &[&str]) -> std::result::Result<Vec<Regex>, regex::Error> {
            patterns
                .iter()
                .map(|pattern| Regex::new(&format!("(?i){pattern}")))
                .collect()
        }

        Ok(Self {
            touchscreen: compile(touchscreen)?,
            touchpad: compile(touchpad)?,
            keyboard: compile(keyboard)?,
            mouse: compile(mouse)?,
        })
    }

    /// A table that never matches, leaving classification to capabilities.
    pub fn empty() -> Self {
        Self {
            touchscreen: Vec::new(),
            touchpad: Vec::new(),
            keyboard: Vec::new(),
            mouse: Vec::new(),
        }
    }

    /// First kind whose patterns match `name`.
    pub fn match_name(&self, name: &str) -> Option<DeviceKind> {
        let tables = [
            (DeviceKind::Touchscreen, &self.touchscreen),
            (DeviceKind::Touchpad, &self.touchpad),
            (DeviceKind::Keyboard, &self.keyboard),
            (DeviceKind::Mouse, &self.mouse),
        ];
        tables
            .into_iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(name)))
            .map(|(kind, _)| kind)
    }
}

impl Default for NamePatterns {
    fn default() -> Self {
        // The default patterns are literals known to compile.
        Self::new(
            Self::DEFAULT_TOUCHSCREEN,
            Self::DEFAULT_TOUCHPAD,
            Self::DEFAULT_KEYBOARD,
            Self::DEFAULT_MOUSE,
        )
        .unwrap_or_else(|_| Self::empty())
    }
}

fn is_touchscreen(caps: &Capabilities) -> bool {
    TOUCHSCREEN_AXES
        .iter()
        .filter(|axis| caps.has_absolute_axis(**axis))
        .count()
        >= 2
}

fn has_keyboard_keys(caps: &Capabilities) -> bool {
    REFERENCE_KEYBOARD_KEYS
        .iter()
        .filter(|key| caps.has_key(**key))
        .count()
        >= 3
}

fn is_pointer(caps: &Capabilities) -> bool {
    (caps.has_relative() || caps.has_absolute())
        && MOUSE_BUTTONS.iter().any(|button| caps.has_key(*button))
}

/// Classify a device from its name and capabilities.
pub fn classify(name: &str, caps: &Capabilities, patterns: &NamePatterns) -> DeviceKind {
    if is_touchscreen(caps) {
        return DeviceKind::Touchscreen;
    }
    if let Some(kind) = patterns.match_name(name) {
        return kind;
    }
    if has_keyboard_keys(caps) {
        return DeviceKind::Keyboard;
    }
    if is_pointer(caps) {
        return DeviceKind::Mouse;
    }
    DeviceKind::Unknown
}

/// Number of devices per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceSummary {
    pub keyboards: usize,
    pub mice: usize,
    pub touchscreens: usize,
    pub touchpads: usize,
    pub unknown: usize,
    pub total: usize,
}

/// Enumerates input devices through a backend and classifies them.
///
/// [`enumerate`](Self::enumerate) always scans afresh. The classifier also
/// keeps one snapshot for the query helpers, replaced only by
/// [`refresh`](Self::refresh).
pub struct DeviceClassifier {
    backend: Arc<dyn InputBackend>,
    patterns: NamePatterns,
    snapshot: RwLock<Vec<DeviceDescriptor>>,
}

impl DeviceClassifier {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self::with_patterns(backend, NamePatterns::default())
    }

    pub fn with_patterns(backend: Arc<dyn InputBackend>, patterns: NamePatterns) -> Self {
        Self {
            backend,
            patterns,
            snapshot: RwLock::new(Vec::new()),
        }
    }

    /// The backend devices are scanned and opened through.
    pub fn backend(&self) -> &Arc<dyn InputBackend> {
        &self.backend
    }

    pub fn patterns(&self) -> &NamePatterns {
        &self.patterns
    }

    /// Scan and classify every device the backend can open.
    pub fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        let raw = self.backend.scan()?;
        let devices: Vec<DeviceDescriptor> =
            raw.into_iter().map(|dev| self.describe(dev)).collect();
        log::debug!("Enumerated {} input device(s)", devices.len());
        Ok(devices)
    }

    fn describe(&self, raw: RawDevice) -> DeviceDescriptor {
        let kind = classify(&raw.name, &raw.capabilities, &self.patterns);
        log::debug!("{} -> {} ({})", raw.path.display(), raw.name, kind);
        DeviceDescriptor {
            path: raw.path,
            name: raw.name,
            phys: raw.phys,
            vendor: raw.vendor,
            product: raw.product,
            capabilities: raw.capabilities,
            kind,
        }
    }

    /// Discard the snapshot and re-scan.
    pub fn refresh(&self) -> Result<Vec<DeviceDescriptor>> {
        let devices = self.enumerate()?;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = devices.clone();
        Ok(devices)
    }

    /// The devices found by the last [`refresh`](Self::refresh).
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn by_kind(&self, kind: DeviceKind) -> Vec<DeviceDescriptor> {
        self.devices()
            .into_iter()
            .filter(|dev| dev.kind == kind)
            .collect()
    }

    pub fn get(&self, path: &Path) -> Option<DeviceDescriptor> {
        self.devices().into_iter().find(|dev| dev.path == path)
    }

    pub fn summary(&self) -> DeviceSummary {
        let mut summary = DeviceSummary::default();
        for dev in self.snapshot.read().unwrap_or_else(PoisonError::into_inner).iter() {
            match dev.kind {
                DeviceKind::Keyboard => summary.keyboards += 1,
                DeviceKind::Mouse => summary.mice += 1,
                DeviceKind::Touchscreen => summary.touchscreens += 1,
                DeviceKind::Touchpad => summary.touchpads += 1,
                DeviceKind::Unknown => summary.unknown += 1,
            }
            summary.total += 1;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockBackend, MockDevice};
    use evdev::RelativeAxisType;

    fn keys(list: &[Key]) -> BTreeSet<u16> {
        list.iter().map(|k| k.code()).collect()
    }

    fn keyboard_caps() -> Capabilities {
        Capabilities {
            keys: keys(&[Key::KEY_A, Key::KEY_Z, Key::KEY_ENTER, Key::KEY_ESC]),
            ..Default::default()
        }
    }

    fn mouse_caps() -> Capabilities {
        Capabilities {
            keys: keys(&[Key::BTN_LEFT, Key::BTN_RIGHT]),
            relative_axes: [RelativeAxisType::REL_X.0, RelativeAxisType::REL_Y.0].into(),
            ..Default::default()
        }
    }

    fn multitouch_caps() -> Capabilities {
        Capabilities {
            absolute_axes: [
                AbsoluteAxisType::ABS_MT_SLOT.0,
                AbsoluteAxisType::ABS_MT_TRACKING_ID.0,
            ]
            .into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_touchscreen_wins_over_name_and_keys() {
        let patterns = NamePatterns::default();
        let mut caps = multitouch_caps();
        caps.keys = keyboard_caps().keys;
        assert_eq!(
            classify("Acme USB Keyboard", &caps, &patterns),
            DeviceKind::Touchscreen
        );
    }

    #[test]
    fn test_single_multitouch_axis_is_not_touchscreen() {
        let caps = Capabilities {
            absolute_axes: [AbsoluteAxisType::ABS_MT_SLOT.0].into(),
            ..Default::default()
        };
        assert_eq!(
            classify("mystery", &caps, &NamePatterns::default()),
            DeviceKind::Unknown
        );
    }

    #[test]
    fn test_name_patterns_in_priority_order() {
        let patterns = NamePatterns::default();
        let none = Capabilities::default();
        assert_eq!(
            classify("SYNA Touchpad", &none, &patterns),
            DeviceKind::Touchpad
        );
        assert_eq!(
            classify("Keychron K2", &none, &patterns),
            DeviceKind::Keyboard
        );
        assert_eq!(
            classify("Logitech USB Optical Mouse", &none, &patterns),
            DeviceKind::Mouse
        );
        // Touchpad patterns are checked before keyboard ones.
        assert_eq!(
            classify("Elan Touchpad Keyboard", &none, &patterns),
            DeviceKind::Touchpad
        );
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let patterns = NamePatterns::default();
        assert_eq!(
            patterns.match_name("GENERIC KEYBOARD"),
            Some(DeviceKind::Keyboard)
        );
        assert_eq!(patterns.match_name("Power Button"), None);
    }

    #[test]
    fn test_capability_heuristics() {
        let patterns = NamePatterns::empty();
        assert_eq!(
            classify("dev", &keyboard_caps(), &patterns),
            DeviceKind::Keyboard
        );
        assert_eq!(classify("dev", &mouse_caps(), &patterns), DeviceKind::Mouse);

        // Two reference keys are not enough.
        let sparse = Capabilities {
            keys: keys(&[Key::KEY_A, Key::KEY_Z]),
            ..Default::default()
        };
        assert_eq!(classify("dev", &sparse, &patterns), DeviceKind::Unknown);

        // Buttons without axes are not a mouse.
        let buttons_only = Capabilities {
            keys: keys(&[Key::BTN_LEFT]),
            ..Default::default()
        };
        assert_eq!(
            classify("dev", &buttons_only, &patterns),
            DeviceKind::Unknown
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let patterns = NamePatterns::default();
        let caps = mouse_caps();
        let first = classify("Some Pointer", &caps, &patterns);
        for _ in 0..10 {
            assert_eq!(classify("Some Pointer", &caps, &patterns), first);
        }
    }

    #[test]
    fn test_custom_patterns() {
        let patterns = NamePatterns::new(&[], &[], &["^kiosk"], &[]).unwrap();
        assert_eq!(patterns.match_name("Kiosk Panel"), Some(DeviceKind::Keyboard));
        assert!(NamePatterns::new(&["("], &[], &[], &[]).is_err());
    }

    #[test]
    fn test_device_kind_parse() {
        assert_eq!("Keyboard".parse::<DeviceKind>(), Ok(DeviceKind::Keyboard));
        assert_eq!(" touchpad ".parse::<DeviceKind>(), Ok(DeviceKind::Touchpad));
        assert!("joystick".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_enumerate_is_fresh_and_refresh_replaces_snapshot() {
        let backend = Arc::new(MockBackend::new());
        backend.add_device(MockDevice::keyboard("/dev/input/event0", "AT Keyboard"));
        let classifier = DeviceClassifier::new(backend.clone());

        let first = classifier.enumerate().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, DeviceKind::Keyboard);
        // enumerate() does not populate the snapshot.
        assert!(classifier.devices().is_empty());

        classifier.refresh().unwrap();
        assert_eq!(classifier.devices().len(), 1);

        backend.add_device(MockDevice::mouse("/dev/input/event1", "USB Mouse"));
        assert_eq!(classifier.enumerate().unwrap().len(), 2);
        // The earlier result is untouched.
        assert_eq!(first.len(), 1);
        assert_eq!(classifier.devices().len(), 1);

        classifier.refresh().unwrap();
        let summary = classifier.summary();
        assert_eq!(summary.keyboards, 1);
        assert_eq!(summary.mice, 1);
        assert_eq!(summary.total, 2);
        assert_eq!(classifier.by_kind(DeviceKind::Mouse).len(), 1);
        assert!(classifier.get(Path::new("/dev/input/event1")).is_some());
        assert!(classifier.get(Path::new("/dev/input/event9")).is_none());
    }

    #[test]
    fn test_unopenable_devices_are_skipped() {
        let backend = Arc::new(MockBackend::new());
        backend.add_device(MockDevice::keyboard("/dev/input/event0", "AT Keyboard"));
        backend.add_device(
            MockDevice::keyboard("/dev/input/event1", "Locked Keyboard").unopenable(),
        );
        let classifier = DeviceClassifier::new(backend);
        let devices = classifier.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].path, PathBuf::from("/dev/input/event0"));
    }
}
