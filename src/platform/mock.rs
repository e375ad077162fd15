//! In-memory backend for tests.
//!
//! Every opened handle owns one end of a socket pair, so the real poll loop
//! runs unchanged against it. Injected events are delivered to every open
//! handle of a device unless one of them holds the grab, in which case only
//! the grabbing handle sees them.

use crate::backend::{
    AbsRange, InputBackend, InputSource, RawDevice, SyntheticDevice, SyntheticTemplate,
    synthetic_name,
};
use crate::device::Capabilities;
use crate::error::{Error, Result};
use evdev::{AbsoluteAxisType, EventType, InputEvent, InputEventKind, Key, RelativeAxisType};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Configuration of one fake device node.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub path: PathBuf,
    pub name: String,
    pub capabilities: Capabilities,
    openable: bool,
    grab_fails: bool,
    synthetic_fails: bool,
    synthetic_panics: bool,
}

impl MockDevice {
    pub fn new(path: impl Into<PathBuf>, name: &str, capabilities: Capabilities) -> Self {
        Self {
            path: path.into(),
            name: name.to_string(),
            capabilities,
            openable: true,
            grab_fails: false,
            synthetic_fails: false,
            synthetic_panics: false,
        }
    }

    pub fn keyboard(path: impl Into<PathBuf>, name: &str) -> Self {
        let caps = Capabilities {
            keys: (1..=127).collect(),
            ..Default::default()
        };
        Self::new(path, name, caps)
    }

    pub fn mouse(path: impl Into<PathBuf>, name: &str) -> Self {
        let caps = Capabilities {
            keys: [Key::BTN_LEFT, Key::BTN_RIGHT, Key::BTN_MIDDLE]
                .iter()
                .map(|k| k.code())
                .collect(),
            relative_axes: [
                RelativeAxisType::REL_X.0,
                RelativeAxisType::REL_Y.0,
                RelativeAxisType::REL_WHEEL.0,
            ]
            .into(),
            ..Default::default()
        };
        Self::new(path, name, caps)
    }

    pub fn touchpad(path: impl Into<PathBuf>, name: &str) -> Self {
        let caps = Capabilities {
            keys: [Key::BTN_LEFT, Key::BTN_TOUCH]
                .iter()
                .map(|k| k.code())
                .collect(),
            absolute_axes: [AbsoluteAxisType::ABS_X.0, AbsoluteAxisType::ABS_Y.0].into(),
            ..Default::default()
        };
        Self::new(path, name, caps)
    }

    pub fn touchscreen(path: impl Into<PathBuf>, name: &str) -> Self {
        let caps = Capabilities {
            keys: [Key::BTN_TOUCH.code()].into(),
            absolute_axes: [
                AbsoluteAxisType::ABS_MT_SLOT.0,
                AbsoluteAxisType::ABS_MT_POSITION_X.0,
                AbsoluteAxisType::ABS_MT_POSITION_Y.0,
                AbsoluteAxisType::ABS_MT_TRACKING_ID.0,
            ]
            .into(),
            ..Default::default()
        };
        Self::new(path, name, caps)
    }

    /// Listed by nothing; every open fails with `EACCES`.
    pub fn unopenable(mut self) -> Self {
        self.openable = false;
        self
    }

    /// Opens fine, but every grab fails with `EBUSY`.
    pub fn grab_fails(mut self) -> Self {
        self.grab_fails = true;
        self
    }

    /// Creating a pass-through device for it fails.
    pub fn synthetic_fails(mut self) -> Self {
        self.synthetic_fails = true;
        self
    }

    /// Creating a pass-through device for it panics.
    pub fn synthetic_panics(mut self) -> Self {
        self.synthetic_panics = true;
        self
    }
}

struct Handle {
    id: u64,
    queue: Mutex<VecDeque<InputEvent>>,
    writer: Mutex<Option<UnixStream>>,
    disconnected: AtomicBool,
}

impl Handle {
    fn deliver(&self, events: &[InputEvent]) {
        lock(&self.queue).extend(events.iter().copied());
        if let Some(writer) = lock(&self.writer).as_mut() {
            // A full buffer still wakes the reader.
            let _ = writer.write(&[1]);
        }
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        lock(&self.writer).take();
    }
}

struct Node {
    config: MockDevice,
    handles: Vec<Weak<Handle>>,
    grabbed_by: Option<u64>,
    opens: usize,
}

/// What a synthetic device was created from and what it emitted.
pub struct SyntheticRecord {
    pub template: SyntheticTemplate,
    events: Mutex<Vec<InputEvent>>,
    alive: AtomicBool,
}

impl SyntheticRecord {
    pub fn events(&self) -> Vec<InputEvent> {
        lock(&self.events).clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    synthetic: Vec<Arc<SyntheticRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn os_error(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// A backend whose devices exist only in memory.
#[derive(Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
    next_id: AtomicU64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: MockDevice) {
        let node = Node {
            config: device.clone(),
            handles: Vec::new(),
            grabbed_by: None,
            opens: 0,
        };
        lock(&self.state).nodes.insert(device.path, node);
    }

    /// Remove a device; every open handle starts failing reads.
    pub fn unplug(&self, path: impl AsRef<Path>) {
        let node = lock(&self.state).nodes.remove(path.as_ref());
        if let Some(node) = node {
            for handle in node.handles.iter().filter_map(Weak::upgrade) {
                handle.disconnect();
            }
        }
    }

    /// Deliver raw events followed by a `SYN_REPORT`.
    pub fn inject(&self, path: impl AsRef<Path>, events: &[InputEvent]) {
        let mut batch = events.to_vec();
        batch.push(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));

        let state = lock(&self.state);
        let Some(node) = state.nodes.get(path.as_ref()) else {
            return;
        };
        for handle in node.handles.iter().filter_map(Weak::upgrade) {
            if node.grabbed_by.is_none_or(|id| id == handle.id) {
                handle.deliver(&batch);
            }
        }
    }

    pub fn key(&self, path: impl AsRef<Path>, key: Key, value: i32) {
        self.inject(path, &[InputEvent::new(EventType::KEY, key.code(), value)]);
    }

    pub fn press(&self, path: impl AsRef<Path>, key: Key) {
        self.key(path, key, 1);
    }

    pub fn release(&self, path: impl AsRef<Path>, key: Key) {
        self.key(path, key, 0);
    }

    pub fn tap(&self, path: impl AsRef<Path>, key: Key) {
        let path = path.as_ref();
        self.press(path, key);
        self.release(path, key);
    }

    /// Press every key in order, then release them in reverse.
    pub fn chord(&self, path: impl AsRef<Path>, keys: &[Key]) {
        let path = path.as_ref();
        for key in keys {
            self.press(path, *key);
        }
        for key in keys.iter().rev() {
            self.release(path, *key);
        }
    }

    pub fn is_grabbed(&self, path: impl AsRef<Path>) -> bool {
        lock(&self.state)
            .nodes
            .get(path.as_ref())
            .is_some_and(|node| node.grabbed_by.is_some())
    }

    /// Number of handles currently open on a device.
    pub fn open_handles(&self, path: impl AsRef<Path>) -> usize {
        lock(&self.state)
            .nodes
            .get(path.as_ref())
            .map_or(0, |node| node.handles.iter().filter(|h| h.strong_count() > 0).count())
    }

    /// Number of successful opens of a device so far.
    pub fn open_count(&self, path: impl AsRef<Path>) -> usize {
        lock(&self.state)
            .nodes
            .get(path.as_ref())
            .map_or(0, |node| node.opens)
    }

    /// Every synthetic device ever created for `path`, oldest first.
    pub fn synthetic_devices(&self, path: impl AsRef<Path>) -> Vec<Arc<SyntheticRecord>> {
        lock(&self.state)
            .synthetic
            .iter()
            .filter(|rec| rec.template.source_path == path.as_ref())
            .cloned()
            .collect()
    }

    /// `(code, value)` of every key event emitted on behalf of `path`.
    pub fn synthetic_keys(&self, path: impl AsRef<Path>) -> Vec<(u16, i32)> {
        self.synthetic_devices(path)
            .iter()
            .flat_map(|rec| rec.events())
            .filter_map(|ev| match ev.kind() {
                InputEventKind::Key(key) => Some((key.code(), ev.value())),
                _ => None,
            })
            .collect()
    }

    pub fn live_synthetic_count(&self) -> usize {
        lock(&self.state)
            .synthetic
            .iter()
            .filter(|rec| rec.is_alive())
            .count()
    }
}

impl InputBackend for MockBackend {
    fn scan(&self) -> Result<Vec<RawDevice>> {
        Ok(lock(&self.state)
            .nodes
            .values()
            .filter(|node| node.config.openable)
            .map(|node| RawDevice {
                path: node.config.path.clone(),
                name: node.config.name.clone(),
                phys: None,
                vendor: 0x1234,
                product: 0x5678,
                capabilities: node.config.capabilities.clone(),
            })
            .collect())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn InputSource>> {
        let open_failed = |code| Error::DeviceOpenFailed {
            path: path.to_path_buf(),
            source: os_error(code),
        };

        let mut state = lock(&self.state);
        let node = state.nodes.get_mut(path).ok_or_else(|| open_failed(libc::ENOENT))?;
        if !node.config.openable {
            return Err(open_failed(libc::EACCES));
        }

        let (writer, reader) = UnixStream::pair().map_err(Error::Io)?;
        reader.set_nonblocking(true).map_err(Error::Io)?;
        writer.set_nonblocking(true).map_err(Error::Io)?;
        let handle = Arc::new(Handle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            queue: Mutex::new(VecDeque::new()),
            writer: Mutex::new(Some(writer)),
            disconnected: AtomicBool::new(false),
        });
        node.handles.retain(|h| h.strong_count() > 0);
        node.handles.push(Arc::downgrade(&handle));
        node.opens += 1;

        Ok(Box::new(MockSource {
            config: node.config.clone(),
            handle,
            reader,
            state: Arc::clone(&self.state),
        }))
    }

    fn create_synthetic(&self, template: &SyntheticTemplate) -> Result<Box<dyn SyntheticDevice>> {
        let mut state = lock(&self.state);
        let (fails, panics) = state
            .nodes
            .get(&template.source_path)
            .map_or((false, false), |node| {
                (node.config.synthetic_fails, node.config.synthetic_panics)
            });
        if panics {
            drop(state);
            panic!("synthetic device for {} exploded", template.source_path.display());
        }
        if fails {
            return Err(Error::SyntheticDeviceCreateFailed {
                path: template.source_path.clone(),
                source: os_error(libc::EACCES),
            });
        }

        let record = Arc::new(SyntheticRecord {
            template: template.clone(),
            events: Mutex::new(Vec::new()),
            alive: AtomicBool::new(true),
        });
        state.synthetic.push(Arc::clone(&record));
        Ok(Box::new(MockSynthetic { record }))
    }
}

struct MockSource {
    config: MockDevice,
    handle: Arc<Handle>,
    reader: UnixStream,
    state: Arc<Mutex<State>>,
}

impl MockSource {
    fn with_node<T>(&self, f: impl FnOnce(&mut Node) -> io::Result<T>) -> io::Result<T> {
        let mut state = lock(&self.state);
        match state.nodes.get_mut(&self.config.path) {
            Some(node) => f(node),
            None => Err(os_error(libc::ENODEV)),
        }
    }
}

impl AsRawFd for MockSource {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

impl InputSource for MockSource {
    fn path(&self) -> &Path {
        &self.config.path
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn synthetic_template(&self) -> SyntheticTemplate {
        let caps = &self.config.capabilities;
        SyntheticTemplate {
            source_path: self.config.path.clone(),
            name: synthetic_name(&self.config.name),
            bus_type: 0x03,
            vendor: 0x1234,
            product: 0x5678,
            version: 1,
            keys: caps.keys.iter().copied().collect(),
            relative_axes: caps.relative_axes.iter().copied().collect(),
            absolute_axes: caps
                .absolute_axes
                .iter()
                .map(|code| (*code, AbsRange::default()))
                .collect(),
            switches: Vec::new(),
            misc: Vec::new(),
            properties: Vec::new(),
        }
    }

    fn grab(&mut self) -> io::Result<()> {
        let id = self.handle.id;
        self.with_node(|node| {
            if node.config.grab_fails {
                return Err(os_error(libc::EBUSY));
            }
            match node.grabbed_by {
                Some(owner) if owner != id => Err(os_error(libc::EBUSY)),
                _ => {
                    node.grabbed_by = Some(id);
                    Ok(())
                }
            }
        })
    }

    fn ungrab(&mut self) -> io::Result<()> {
        let id = self.handle.id;
        self.with_node(|node| {
            if node.grabbed_by == Some(id) {
                node.grabbed_by = None;
                Ok(())
            } else {
                Err(os_error(libc::EINVAL))
            }
        })
    }

    fn fetch(&mut self) -> io::Result<Vec<InputEvent>> {
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        if self.handle.disconnected.load(Ordering::SeqCst) {
            return Err(os_error(libc::ENODEV));
        }
        Ok(lock(&self.handle.queue).drain(..).collect())
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        // Closing the fd releases a held grab.
        let id = self.handle.id;
        let _ = self.with_node(|node| {
            if node.grabbed_by == Some(id) {
                node.grabbed_by = None;
            }
            Ok(())
        });
    }
}

struct MockSynthetic {
    record: Arc<SyntheticRecord>,
}

impl SyntheticDevice for MockSynthetic {
    fn emit(&mut self, events: &[InputEvent]) -> io::Result<()> {
        lock(&self.record.events).extend(events.iter().copied());
        Ok(())
    }
}

impl Drop for MockSynthetic {
    fn drop(&mut self) {
        self.record.alive.store(false, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::poll::{POLL_TIMEOUT, wait_readable};

    const KBD: &str = "/dev/input/event0";

    #[test]
    fn test_events_reach_every_handle_until_grabbed() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::keyboard(KBD, "AT Keyboard"));
        let mut a = backend.open(Path::new(KBD)).unwrap();
        let mut b = backend.open(Path::new(KBD)).unwrap();
        assert_eq!(backend.open_handles(KBD), 2);

        backend.press(KBD, Key::KEY_A);
        assert_eq!(wait_readable(&[a.as_raw_fd()], POLL_TIMEOUT).unwrap(), vec![0]);
        assert_eq!(a.fetch().unwrap().len(), 2);
        assert_eq!(b.fetch().unwrap().len(), 2);

        a.grab().unwrap();
        assert!(backend.is_grabbed(KBD));
        assert_eq!(b.grab().unwrap_err().raw_os_error(), Some(libc::EBUSY));

        backend.press(KBD, Key::KEY_B);
        assert_eq!(a.fetch().unwrap().len(), 2);
        assert!(b.fetch().unwrap().is_empty());

        drop(a);
        assert!(!backend.is_grabbed(KBD));
    }

    #[test]
    fn test_unplug_fails_reads() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::keyboard(KBD, "AT Keyboard"));
        let mut source = backend.open(Path::new(KBD)).unwrap();
        backend.unplug(KBD);
        assert_eq!(
            wait_readable(&[source.as_raw_fd()], POLL_TIMEOUT).unwrap(),
            vec![0]
        );
        assert!(source.fetch().is_err());
        assert!(backend.open(Path::new(KBD)).is_err());
    }

    #[test]
    fn test_synthetic_devices_are_recorded() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::keyboard(KBD, "AT Keyboard"));
        let source = backend.open(Path::new(KBD)).unwrap();
        let mut synthetic = backend
            .create_synthetic(&source.synthetic_template())
            .unwrap();
        synthetic
            .emit(&[InputEvent::new(EventType::KEY, Key::KEY_A.code(), 1)])
            .unwrap();
        assert_eq!(backend.synthetic_keys(KBD), vec![(Key::KEY_A.code(), 1)]);
        assert_eq!(backend.live_synthetic_count(), 1);
        drop(synthetic);
        assert_eq!(backend.live_synthetic_count(), 0);
    }
}
