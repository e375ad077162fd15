//! The seam between the lock engine and the kernel input subsystem.
//!
//! [`InputBackend`] enumerates and opens devices and creates synthetic
//! devices; [`InputSource`] is one opened physical device; [`SyntheticDevice`]
//! is one uinput device. The production implementation lives in
//! [`crate::platform::linux`].

use crate::device::Capabilities;
use crate::error::Result;
use evdev::InputEvent;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// What a backend reports for one device node during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub path: PathBuf,
    pub name: String,
    pub phys: Option<String>,
    pub vendor: u16,
    pub product: u16,
    pub capabilities: Capabilities,
}

/// Range of one absolute axis, as reported by `EVIOCGABS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbsRange {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

/// Suffix appended to a source device's name for its pass-through twin.
pub const SYNTHETIC_SUFFIX: &str = " (inputlock)";

/// Longest name uinput accepts: `UINPUT_MAX_NAME_SIZE` (80) minus the
/// terminating NUL, minus one more because evdev asserts `len + 1 < 80`.
pub const MAX_SYNTHETIC_NAME_LEN: usize = 78;

/// Name for the twin of `source`, shortened at a char boundary so the
/// suffix always fits.
pub fn synthetic_name(source: &str) -> String {
    let budget = MAX_SYNTHETIC_NAME_LEN - SYNTHETIC_SUFFIX.len();
    let mut end = source.len().min(budget);
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &source[..end], SYNTHETIC_SUFFIX)
}

/// Everything needed to build a synthetic device that mirrors a source.
///
/// Synchronization and force-feedback capabilities are never part of a
/// template.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyntheticTemplate {
    /// Path of the physical device this template was taken from.
    pub source_path: PathBuf,
    pub name: String,
    pub bus_type: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    pub keys: Vec<u16>,
    pub relative_axes: Vec<u16>,
    pub absolute_axes: Vec<(u16, AbsRange)>,
    pub switches: Vec<u16>,
    /// `EV_MSC` codes, such as `MSC_SCAN`.
    pub misc: Vec<u16>,
    /// `INPUT_PROP_*` bits.
    pub properties: Vec<u16>,
}

/// An enumerator and factory for input devices.
pub trait InputBackend: Send + Sync {
    /// List every input device node that could be opened.
    ///
    /// Nodes that fail to open are skipped, not reported.
    fn scan(&self) -> Result<Vec<RawDevice>>;

    /// Open a device node for reading. Does not grab it.
    fn open(&self, path: &Path) -> Result<Box<dyn InputSource>>;

    /// Create a synthetic device. Dropping the returned value destroys it.
    fn create_synthetic(&self, template: &SyntheticTemplate) -> Result<Box<dyn SyntheticDevice>>;
}

/// One opened physical input device.
pub trait InputSource: AsRawFd + Send {
    fn path(&self) -> &Path;

    fn name(&self) -> &str;

    /// Describe this device so it can be mirrored by a synthetic device.
    fn synthetic_template(&self) -> SyntheticTemplate;

    /// Take exclusive ownership of the device's event stream.
    fn grab(&mut self) -> io::Result<()>;

    fn ungrab(&mut self) -> io::Result<()>;

    /// Read whatever events are queued without blocking.
    ///
    /// Returns an empty batch when nothing is pending and an error when the
    /// device is gone.
    fn fetch(&mut self) -> io::Result<Vec<InputEvent>>;
}

/// A uinput device events can be injected into.
pub trait SyntheticDevice: Send {
    fn emit(&mut self, events: &[InputEvent]) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_name_keeps_short_names() {
        assert_eq!(synthetic_name("AT Keyboard"), "AT Keyboard (inputlock)");
    }

    #[test]
    fn test_synthetic_name_truncates_long_names() {
        let long = "Logitech USB Receiver Keyboard With A Really Long Vendor Supplied Name";
        assert!(long.len() >= 67);
        let name = synthetic_name(long);
        assert!(name.len() <= MAX_SYNTHETIC_NAME_LEN);
        assert!(name.len() + 1 < 80);
        assert!(name.ends_with(SYNTHETIC_SUFFIX));
        assert!(long.starts_with(name.trim_end_matches(SYNTHETIC_SUFFIX)));
    }

    #[test]
    fn test_synthetic_name_cuts_at_char_boundary() {
        // One ASCII byte puts the byte budget in the middle of an 'é'.
        let long = format!("a{}", "é".repeat(60));
        let name = synthetic_name(&long);
        let stem = name.trim_end_matches(SYNTHETIC_SUFFIX);
        assert_eq!(stem.len(), MAX_SYNTHETIC_NAME_LEN - SYNTHETIC_SUFFIX.len() - 1);
        assert!(long.starts_with(stem));
    }
}
