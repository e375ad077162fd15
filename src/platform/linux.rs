//! evdev and uinput backend.
//!
//! Reads device nodes under `/dev/input` and creates pass-through devices
//! through `/dev/uinput`. Both need the process to be root or a member of
//! the `input` group:
//!
//! ```bash
//! sudo usermod -aG input $USER
//! # Then log out and back in
//! ```

use crate::backend::{
    AbsRange, InputBackend, InputSource, RawDevice, SyntheticDevice, SyntheticTemplate,
    synthetic_name,
};
use crate::device::Capabilities;
use crate::error::{Error, Result};
use crate::platform::poll::set_nonblocking;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, BusType, Device, InputEvent, InputId, Key, MiscType,
    PropType, RelativeAxisType, SwitchType, UinputAbsSetup,
};
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// The production backend.
#[derive(Debug, Clone)]
pub struct EvdevBackend {
    dir: PathBuf,
}

impl EvdevBackend {
    pub fn new() -> Self {
        Self::with_dir("/dev/input")
    }

    /// Scan a different directory for `event*` nodes.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn event_nodes(&self) -> Result<Vec<PathBuf>> {
        let dir = fs::read_dir(&self.dir).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                Error::PermissionDenied(format!(
                    "Cannot access {}: {}. Make sure you're in the 'input' group.",
                    self.dir.display(),
                    e
                ))
            } else {
                Error::Io(e)
            }
        })?;

        let mut nodes: Vec<PathBuf> = dir
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("event"))
            })
            .collect();
        // event2 before event10
        nodes.sort_by_key(|path| (event_index(path), path.clone()));
        Ok(nodes)
    }
}

impl Default for EvdevBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn event_index(path: &Path) -> u32 {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix("event"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

fn capabilities(device: &Device) -> Capabilities {
    let mut caps = Capabilities::default();
    if let Some(keys) = device.supported_keys() {
        caps.keys = keys.iter().map(|k| k.code()).collect();
    }
    if let Some(axes) = device.supported_relative_axes() {
        caps.relative_axes = axes.iter().map(|a| a.0).collect();
    }
    if let Some(axes) = device.supported_absolute_axes() {
        caps.absolute_axes = axes.iter().map(|a| a.0).collect();
    }
    caps
}

fn raw_device(path: &Path, device: &Device) -> RawDevice {
    let id = device.input_id();
    RawDevice {
        path: path.to_path_buf(),
        name: device.name().unwrap_or("Unknown").to_string(),
        phys: device.physical_path().map(str::to_string),
        vendor: id.vendor(),
        product: id.product(),
        capabilities: capabilities(device),
    }
}

impl InputBackend for EvdevBackend {
    fn scan(&self) -> Result<Vec<RawDevice>> {
        let mut devices = Vec::new();
        for path in self.event_nodes()? {
            match Device::open(&path) {
                Ok(device) => devices.push(raw_device(&path, &device)),
                Err(e) => log::debug!("Failed to open {}: {}", path.display(), e),
            }
        }
        Ok(devices)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn InputSource>> {
        let source = EvdevSource::open(path).map_err(|source| Error::DeviceOpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Box::new(source))
    }

    fn create_synthetic(&self, template: &SyntheticTemplate) -> Result<Box<dyn SyntheticDevice>> {
        let device = build_virtual_device(template).map_err(|source| {
            Error::SyntheticDeviceCreateFailed {
                path: template.source_path.clone(),
                source,
            }
        })?;
        log::debug!("Created synthetic device '{}'", template.name);
        Ok(Box::new(EvdevSynthetic { device }))
    }
}

fn build_virtual_device(template: &SyntheticTemplate) -> io::Result<VirtualDevice> {
    let id = InputId::new(
        BusType(template.bus_type),
        template.vendor,
        template.product,
        template.version,
    );
    let mut builder = VirtualDeviceBuilder::new()?
        .name(&template.name)
        .input_id(id);

    if !template.keys.is_empty() {
        let mut keys = AttributeSet::<Key>::new();
        for code in &template.keys {
            keys.insert(Key::new(*code));
        }
        builder = builder.with_keys(&keys)?;
    }

    if !template.relative_axes.is_empty() {
        let mut axes = AttributeSet::<RelativeAxisType>::new();
        for code in &template.relative_axes {
            axes.insert(RelativeAxisType(*code));
        }
        builder = builder.with_relative_axes(&axes)?;
    }

    for (code, range) in &template.absolute_axes {
        let info = AbsInfo::new(
            range.value,
            range.minimum,
            range.maximum,
            range.fuzz,
            range.flat,
            range.resolution,
        );
        builder = builder.with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisType(*code), info))?;
    }

    if !template.switches.is_empty() {
        let mut switches = AttributeSet::<SwitchType>::new();
        for code in &template.switches {
            switches.insert(SwitchType(*code));
        }
        builder = builder.with_switches(&switches)?;
    }

    if !template.misc.is_empty() {
        builder = builder.with_msc(&misc_set(&template.misc))?;
    }

    if !template.properties.is_empty() {
        builder = builder.with_properties(&property_set(&template.properties))?;
    }

    builder.build()
}

fn misc_set(codes: &[u16]) -> AttributeSet<MiscType> {
    let mut misc = AttributeSet::<MiscType>::new();
    for code in codes {
        misc.insert(MiscType(*code));
    }
    misc
}

fn property_set(codes: &[u16]) -> AttributeSet<PropType> {
    let mut properties = AttributeSet::<PropType>::new();
    for code in codes {
        properties.insert(PropType(*code));
    }
    properties
}

/// One opened `/dev/input/event*` node, in non-blocking mode.
pub struct EvdevSource {
    path: PathBuf,
    name: String,
    device: Device,
}

impl EvdevSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::open(path)?;
        set_nonblocking(device.as_raw_fd())?;
        let name = device.name().unwrap_or("Unknown").to_string();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            device,
        })
    }
}

impl AsRawFd for EvdevSource {
    fn as_raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }
}

impl InputSource for EvdevSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn synthetic_template(&self) -> SyntheticTemplate {
        let id = self.device.input_id();
        let caps = capabilities(&self.device);

        let abs_state = self.device.get_abs_state().ok();
        let absolute_axes = caps
            .absolute_axes
            .iter()
            .map(|code| {
                let range = abs_state
                    .as_ref()
                    .and_then(|state| state.get(*code as usize))
                    .map(|info| AbsRange {
                        value: info.value,
                        minimum: info.minimum,
                        maximum: info.maximum,
                        fuzz: info.fuzz,
                        flat: info.flat,
                        resolution: info.resolution,
                    })
                    .unwrap_or_default();
                (*code, range)
            })
            .collect();

        let switches = self
            .device
            .supported_switches()
            .map(|set| set.iter().map(|s| s.0).collect())
            .unwrap_or_default();
        let misc = self
            .device
            .misc_properties()
            .map(|set| set.iter().map(|m| m.0).collect())
            .unwrap_or_default();
        let properties = self.device.properties().iter().map(|p| p.0).collect();

        SyntheticTemplate {
            source_path: self.path.clone(),
            name: synthetic_name(&self.name),
            bus_type: id.bus_type().0,
            vendor: id.vendor(),
            product: id.product(),
            version: id.version(),
            keys: caps.keys.into_iter().collect(),
            relative_axes: caps.relative_axes.into_iter().collect(),
            absolute_axes,
            switches,
            misc,
            properties,
        }
    }

    fn grab(&mut self) -> io::Result<()> {
        self.device.grab()
    }

    fn ungrab(&mut self) -> io::Result<()> {
        self.device.ungrab()
    }

    fn fetch(&mut self) -> io::Result<Vec<InputEvent>> {
        match self.device.fetch_events() {
            Ok(events) => Ok(events.collect()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// A uinput device; destroyed when dropped.
pub struct EvdevSynthetic {
    device: VirtualDevice,
}

impl SyntheticDevice for EvdevSynthetic {
    fn emit(&mut self, events: &[InputEvent]) -> io::Result<()> {
        self.device.emit(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_index_orders_numerically() {
        let mut paths = vec![
            PathBuf::from("/dev/input/event10"),
            PathBuf::from("/dev/input/event2"),
            PathBuf::from("/dev/input/event0"),
        ];
        paths.sort_by_key(|p| event_index(p));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/dev/input/event0"),
                PathBuf::from("/dev/input/event2"),
                PathBuf::from("/dev/input/event10"),
            ]
        );
        assert_eq!(event_index(Path::new("/dev/input/mice")), u32::MAX);
    }

    #[test]
    fn test_scan_skips_non_event_nodes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mice"), b"").unwrap();
        fs::write(dir.path().join("event0"), b"").unwrap();
        let backend = EvdevBackend::with_dir(dir.path());
        assert_eq!(backend.event_nodes().unwrap(), vec![dir.path().join("event0")]);
        // A regular file is not an input device, so it is skipped.
        assert!(backend.scan().unwrap().is_empty());
    }

    #[test]
    fn test_scan_missing_dir_is_error() {
        let backend = EvdevBackend::with_dir("/nonexistent/input");
        assert!(backend.scan().is_err());
    }

    #[test]
    fn test_misc_and_property_codes_are_mirrored() {
        let misc = misc_set(&[MiscType::MSC_SCAN.0]);
        assert!(misc.contains(MiscType::MSC_SCAN));
        assert!(!misc.contains(MiscType::MSC_TIMESTAMP));

        let properties = property_set(&[PropType::POINTER.0, PropType::BUTTONPAD.0]);
        assert!(properties.contains(PropType::POINTER));
        assert!(properties.contains(PropType::BUTTONPAD));
        assert!(!properties.contains(PropType::DIRECT));
    }

    #[test]
    fn test_open_missing_node_reports_path() {
        let backend = EvdevBackend::new();
        let err = backend
            .open(Path::new("/dev/input/event-does-not-exist"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::DeviceOpenFailed { .. }));
    }
}
