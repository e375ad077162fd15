//! Selective pass-through for one grabbed keyboard.
//!
//! While a keyboard is locked its physical node is grabbed, so nothing else
//! on the system sees its events. The forwarder re-exposes the keys needed
//! to unlock (the hotkey chord and the unlock pattern) through a synthetic
//! twin device and swallows everything else.
//!
//! Reader threads never act on an unlock themselves. They report through a
//! [`SignalFn`] and keep running until [`SelectiveForwarder::stop`] is
//! called from outside.

use crate::backend::{InputBackend, InputSource, SyntheticDevice};
use crate::error::{Error, Result};
use crate::hotkey::{Hotkey, HotkeyMatcher, TriggerMode};
use crate::keycode::{KEY_PRESS, KEY_RELEASE, KeyCode};
use crate::pattern::{PatternMatcher, UnlockPattern};
use crate::platform::poll::{POLL_TIMEOUT, wait_readable};
use evdev::{EventType, InputEvent, InputEventKind};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// What a device reader thread reports to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderSignal {
    PatternMatched,
    HotkeyFired,
    /// Reading failed; the reader has already released everything it held.
    Disconnected,
}

/// Callback invoked from reader threads. Must not block.
pub type SignalFn = Arc<dyn Fn(&Path, ReaderSignal) + Send + Sync>;

/// The resolved unlock configuration of a lock session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnlockSettings {
    pub hotkey: Hotkey,
    pub trigger_mode: TriggerMode,
    pub pattern: UnlockPattern,
}

/// Key codes a forwarder lets through: the hotkey's keys (both sides of
/// every modifier) and the pattern's keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedKeySet(BTreeSet<KeyCode>);

impl AllowedKeySet {
    pub fn new(settings: &UnlockSettings) -> Self {
        let mut keys = settings.hotkey.allowed_keys();
        keys.extend(settings.pattern.sequence());
        Self(keys)
    }

    pub fn contains(&self, code: KeyCode) -> bool {
        self.0.contains(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lifecycle of a forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Default)]
struct Counters {
    forwarded: AtomicU64,
    suppressed: AtomicU64,
}

/// One keyboard under selective lock.
pub struct SelectiveForwarder {
    path: PathBuf,
    name: String,
    backend: Arc<dyn InputBackend>,
    source: Option<Box<dyn InputSource>>,
    settings: UnlockSettings,
    allowed: Arc<AllowedKeySet>,
    state: Arc<Mutex<ForwarderState>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    signal: SignalFn,
    thread: Option<JoinHandle<()>>,
}

impl SelectiveForwarder {
    /// Wrap an opened (not yet grabbed) keyboard.
    pub fn new(
        backend: Arc<dyn InputBackend>,
        source: Box<dyn InputSource>,
        settings: UnlockSettings,
        signal: SignalFn,
    ) -> Self {
        Self {
            path: source.path().to_path_buf(),
            name: source.name().to_string(),
            backend,
            source: Some(source),
            allowed: Arc::new(AllowedKeySet::new(&settings)),
            settings,
            state: Arc::new(Mutex::new(ForwarderState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            signal,
            thread: None,
        }
    }

    /// Open `path` through `backend` and wrap it.
    pub fn open(
        backend: Arc<dyn InputBackend>,
        path: &Path,
        settings: UnlockSettings,
        signal: SignalFn,
    ) -> Result<Self> {
        let source = backend.open(path)?;
        Ok(Self::new(backend, source, settings, signal))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allowed_keys(&self) -> &AllowedKeySet {
        &self.allowed
    }

    pub fn state(&self) -> ForwarderState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ForwarderState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_running(&self) -> bool {
        self.state() == ForwarderState::Running
    }

    /// Key events replayed onto the synthetic device.
    pub fn forwarded_count(&self) -> u64 {
        self.counters.forwarded.load(Ordering::Relaxed)
    }

    /// Key events swallowed.
    pub fn suppressed_count(&self) -> u64 {
        self.counters.suppressed.load(Ordering::Relaxed)
    }

    /// Create the synthetic twin, grab the keyboard and start reading.
    ///
    /// On failure the physical device is left ungrabbed and the forwarder
    /// stays [`Idle`](ForwarderState::Idle).
    pub fn start(&mut self) -> Result<()> {
        if self.state() != ForwarderState::Idle {
            return Err(Error::AlreadyRunning);
        }
        let mut source = self.source.take().ok_or(Error::AlreadyRunning)?;

        let synthetic = match self.backend.create_synthetic(&source.synthetic_template()) {
            Ok(synthetic) => synthetic,
            Err(e) => {
                self.source = Some(source);
                return Err(e);
            }
        };

        if let Err(e) = source.grab() {
            drop(synthetic);
            self.source = Some(source);
            return Err(Error::ExclusiveAcquireFailed {
                path: self.path.clone(),
                source: e,
            });
        }

        self.running.store(true, Ordering::SeqCst);
        self.set_state(ForwarderState::Running);

        let reader = Reader {
            source,
            synthetic,
            allowed: Arc::clone(&self.allowed),
            pattern: PatternMatcher::new(self.settings.pattern),
            hotkey: HotkeyMatcher::new(self.settings.hotkey.clone(), self.settings.trigger_mode),
            held: BTreeSet::new(),
            running: Arc::clone(&self.running),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
            signal: Arc::clone(&self.signal),
        };

        let spawned = thread::Builder::new()
            .name(format!("inputlock-forward-{}", file_label(&self.path)))
            .spawn(move || reader.run());
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                log::info!("Forwarding {} ({})", self.name, self.path.display());
                Ok(())
            }
            Err(e) => {
                // The reader, and with it the grabbed source, was dropped.
                self.running.store(false, Ordering::SeqCst);
                self.set_state(ForwarderState::Stopped);
                Err(Error::ThreadError(format!("failed to spawn reader: {e}")))
            }
        }
    }

    /// Stop reading, release every forwarded key still held, ungrab and
    /// destroy the synthetic device. Blocks for at most one poll cycle.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.thread.take() else {
            return match self.state() {
                ForwarderState::Idle => Err(Error::NotRunning),
                _ => Ok(()),
            };
        };

        if self.state() == ForwarderState::Running {
            self.set_state(ForwarderState::Stopping);
        }
        self.running.store(false, Ordering::SeqCst);

        let joined = handle.join();
        self.set_state(ForwarderState::Stopped);
        joined.map_err(|_| Error::ThreadError(format!("reader for {} panicked", self.path.display())))
    }
}

impl Drop for SelectiveForwarder {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A single key event. The synthetic device appends its own `SYN_REPORT`.
fn key_event(code: KeyCode, value: i32) -> [InputEvent; 1] {
    [InputEvent::new(EventType::KEY, code, value)]
}

/// State owned by the reader thread.
struct Reader {
    source: Box<dyn InputSource>,
    synthetic: Box<dyn SyntheticDevice>,
    allowed: Arc<AllowedKeySet>,
    pattern: PatternMatcher,
    hotkey: HotkeyMatcher,
    /// Keys pressed on the synthetic device and not yet released.
    held: BTreeSet<KeyCode>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<ForwarderState>>,
    counters: Arc<Counters>,
    signal: SignalFn,
}

impl Reader {
    fn run(mut self) {
        let result = self.pump();

        self.release_held();
        if let Err(e) = self.source.ungrab() {
            log::debug!("Ungrab of {} failed: {}", self.source.path().display(), e);
        }

        if let Err(e) = result {
            log::warn!("Lost {}: {}", self.source.path().display(), e);
            (self.signal)(self.source.path(), ReaderSignal::Disconnected);
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ForwarderState::Stopped;
        log::debug!(
            "Reader for {} exited, synthetic device destroyed",
            self.source.path().display()
        );
        // The synthetic device is destroyed when `self` drops.
    }

    fn pump(&mut self) -> io::Result<()> {
        let fd = self.source.as_raw_fd();
        while self.running.load(Ordering::SeqCst) {
            if wait_readable(&[fd], POLL_TIMEOUT)?.is_empty() {
                continue;
            }
            for event in self.source.fetch()? {
                self.handle(event);
            }
        }
        Ok(())
    }

    fn handle(&mut self, event: InputEvent) {
        // Only key events are replayed.
        let InputEventKind::Key(key) = event.kind() else {
            return;
        };
        let code = key.code();
        let value = event.value();

        if value == KEY_PRESS && self.pattern.feed(code, true) {
            log::info!("Unlock pattern entered on {}", self.source.path().display());
            (self.signal)(self.source.path(), ReaderSignal::PatternMatched);
            return;
        }

        let fired = self.hotkey.feed(code, value != KEY_RELEASE);

        if self.allowed.contains(code) {
            self.forward(code, value);
        } else {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
        }

        if fired {
            log::info!("Unlock hotkey pressed on {}", self.source.path().display());
            (self.signal)(self.source.path(), ReaderSignal::HotkeyFired);
        }
    }

    fn forward(&mut self, code: KeyCode, value: i32) {
        if let Err(e) = self.synthetic.emit(&key_event(code, value)) {
            log::warn!(
                "Failed to forward key on {}: {}",
                self.source.path().display(),
                e
            );
            return;
        }
        self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
        if value == KEY_RELEASE {
            self.held.remove(&code);
        } else {
            self.held.insert(code);
        }
    }

    fn release_held(&mut self) {
        for code in std::mem::take(&mut self.held) {
            if let Err(e) = self.synthetic.emit(&key_event(code, KEY_RELEASE)) {
                log::warn!("Failed to release held key {}: {}", code, e);
            }
        }
    }
}
