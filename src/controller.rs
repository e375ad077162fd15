//! The lock controller.
//!
//! [`LockController`] owns the lock session, the passive hotkey watcher and
//! a dispatcher thread. Reader threads (forwarders, grabs, the watcher)
//! never change controller state directly; they enqueue a request and the
//! dispatcher acts on it. Lock-state callbacks also run on the dispatcher,
//! one transition at a time.
//!
//! ```no_run
//! use inputlock::config::JsonFileStore;
//! use inputlock::platform::EvdevBackend;
//! use inputlock::LockController;
//! use std::sync::Arc;
//!
//! # fn main() -> inputlock::Result<()> {
//! let store = Arc::new(JsonFileStore::open_default()?);
//! let controller = LockController::with_config(Arc::new(EvdevBackend::new()), store)?;
//! controller.on_lock_state_changed(|locked| println!("locked: {locked}"));
//!
//! let report = controller.lock()?;
//! for failure in &report.failures {
//!     eprintln!("could not lock {}: {}", failure.path.display(), failure.error);
//! }
//! # Ok(())
//! # }
//! ```

use crate::backend::InputBackend;
use crate::config::{ConfigStore, LockConfig, MemoryStore};
use crate::device::{DeviceClassifier, DeviceDescriptor, DeviceKind};
use crate::error::{Error, Result};
use crate::forwarder::{ReaderSignal, SelectiveForwarder, SignalFn, UnlockSettings};
use crate::grab::ExclusiveGrab;
use crate::hotkey::{Hotkey, TriggerMode};
use crate::pattern::UnlockPattern;
use crate::statistics::LockStatistics;
use crate::watcher::GlobalHotkeyWatcher;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What ended a lock session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockTrigger {
    Hotkey,
    Pattern,
    Timer,
    Manual,
    /// Every locked device disconnected.
    DeviceLoss,
}

impl fmt::Display for UnlockTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnlockTrigger::Hotkey => "hotkey",
            UnlockTrigger::Pattern => "pattern",
            UnlockTrigger::Timer => "timer",
            UnlockTrigger::Manual => "manual",
            UnlockTrigger::DeviceLoss => "device loss",
        })
    }
}

/// A device that could not be locked.
#[derive(Debug)]
pub struct DeviceFailure {
    pub path: PathBuf,
    pub name: String,
    pub kind: DeviceKind,
    pub error: Error,
}

/// Outcome of a lock request.
///
/// A lock with some failures is still a lock; only a request that acquired
/// nothing leaves the controller unlocked.
#[derive(Debug, Default)]
pub struct LockReport {
    /// Devices now held by the session.
    pub acquired: Vec<PathBuf>,
    /// Devices that were candidates but could not be acquired.
    pub failures: Vec<DeviceFailure>,
    /// Devices left alone: whitelisted, not selected, or of unknown kind.
    pub skipped: Vec<PathBuf>,
    /// The controller was already locked; nothing was done.
    pub already_locked: bool,
}

impl LockReport {
    /// Whether the controller is locked after this request.
    pub fn is_locked(&self) -> bool {
        self.already_locked || !self.acquired.is_empty()
    }

    pub fn failed_paths(&self) -> Vec<&Path> {
        self.failures.iter().map(|f| f.path.as_path()).collect()
    }
}

enum SessionEntry {
    Forwarder(SelectiveForwarder),
    Grab(ExclusiveGrab),
}

impl SessionEntry {
    /// Stop the entry, returning `(suppressed keys, dropped pointer events)`.
    fn shutdown(self, path: &Path) -> (u64, u64) {
        match self {
            SessionEntry::Forwarder(mut forwarder) => {
                if let Err(e) = forwarder.stop() {
                    log::warn!("Failed to stop forwarder for {}: {}", path.display(), e);
                }
                (forwarder.suppressed_count(), 0)
            }
            SessionEntry::Grab(mut grab) => {
                if let Err(e) = grab.release() {
                    log::warn!("Failed to release {}: {}", path.display(), e);
                }
                (0, grab.dropped_count())
            }
        }
    }
}

struct LockSession {
    id: u64,
    entries: BTreeMap<PathBuf, SessionEntry>,
    deadline: Option<Instant>,
    settings: UnlockSettings,
    signal: SignalFn,
    /// Counters of entries already removed from the session.
    suppressed: u64,
    dropped: u64,
}

impl LockSession {
    fn remove(&mut self, path: &Path) -> bool {
        let Some(entry) = self.entries.remove(path) else {
            return false;
        };
        let (suppressed, dropped) = entry.shutdown(path);
        self.suppressed += suppressed;
        self.dropped += dropped;
        true
    }
}

/// Requests drained by the dispatcher thread.
enum ControlRequest {
    Lock,
    Unlock { session: u64, trigger: UnlockTrigger },
    DeviceLost { session: u64, path: PathBuf },
    TimerChanged,
    Notify(bool),
    Shutdown,
}

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    backend: Arc<dyn InputBackend>,
    classifier: Arc<DeviceClassifier>,
    store: Arc<dyn ConfigStore>,
    config: RwLock<LockConfig>,
    session: Mutex<Option<LockSession>>,
    next_session: AtomicU64,
    watcher: GlobalHotkeyWatcher,
    requests: Sender<ControlRequest>,
    listeners: Mutex<Vec<Listener>>,
    subscribers: Mutex<Vec<Sender<bool>>>,
    #[cfg(feature = "tokio")]
    async_subscribers: Mutex<Vec<tokio::sync::mpsc::UnboundedSender<bool>>>,
    statistics: Mutex<LockStatistics>,
}

impl Inner {
    fn config(&self) -> LockConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request(&self, request: ControlRequest) {
        if self.requests.send(request).is_err() {
            log::error!("Lock dispatcher is gone; request dropped");
        }
    }

    fn persist(&self, config: &LockConfig) {
        if let Err(e) = self.store.save(config) {
            log::warn!("Failed to save configuration: {}", e);
        }
    }

    fn signal_for(&self, session: u64) -> SignalFn {
        let requests = self.requests.clone();
        Arc::new(move |path: &Path, signal| {
            let request = match signal {
                ReaderSignal::HotkeyFired => ControlRequest::Unlock {
                    session,
                    trigger: UnlockTrigger::Hotkey,
                },
                ReaderSignal::PatternMatched => ControlRequest::Unlock {
                    session,
                    trigger: UnlockTrigger::Pattern,
                },
                ReaderSignal::Disconnected => ControlRequest::DeviceLost {
                    session,
                    path: path.to_path_buf(),
                },
            };
            if requests.send(request).is_err() {
                log::error!(
                    "Lock dispatcher is gone; {:?} from {} dropped",
                    signal,
                    path.display()
                );
            }
        })
    }

    fn start_watcher(&self, config: &LockConfig) {
        if !config.global_hotkey {
            return;
        }
        match self.watcher.start() {
            Ok(()) | Err(Error::AlreadyRunning) => {}
            Err(Error::NoKeyboards) => log::warn!("No keyboards to watch for the lock hotkey"),
            Err(e) => log::error!("Failed to start hotkey watcher: {}", e),
        }
    }

    fn stop_watcher(&self) {
        match self.watcher.stop() {
            Ok(()) | Err(Error::NotRunning) => {}
            Err(e) => log::error!("Failed to stop hotkey watcher: {}", e),
        }
    }

    fn new_session(&self, config: &LockConfig) -> LockSession {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        LockSession {
            id,
            entries: BTreeMap::new(),
            deadline: None,
            settings: UnlockSettings {
                hotkey: config.hotkey(),
                trigger_mode: config.trigger_mode,
                pattern: config.pattern(),
            },
            signal: self.signal_for(id),
            suppressed: 0,
            dropped: 0,
        }
    }

    fn lock(&self, kinds: Option<&BTreeSet<DeviceKind>>) -> Result<LockReport> {
        let mut session = guard(&self.session);
        if session.is_some() {
            log::debug!("Already locked");
            return Ok(LockReport {
                already_locked: true,
                ..Default::default()
            });
        }

        let config = self.config();
        let kinds = kinds.unwrap_or(&config.block_kinds);

        // The watcher holds handles to every keyboard.
        self.stop_watcher();

        let devices = match self.classifier.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                self.start_watcher(&config);
                return Err(e);
            }
        };

        let mut next = self.new_session(&config);
        let mut report = LockReport::default();
        for device in devices {
            let selected = kinds.contains(&device.kind) && device.kind != DeviceKind::Unknown;
            if !selected || config.is_whitelisted(&device.path) {
                report.skipped.push(device.path);
                continue;
            }

            match self.acquire(&device, &next.settings, &next.signal) {
                Ok(entry) => {
                    report.acquired.push(device.path.clone());
                    next.entries.insert(device.path, entry);
                }
                Err(error) => {
                    log::warn!("Could not lock {}: {}", device, error);
                    report.failures.push(DeviceFailure {
                        path: device.path,
                        name: device.name,
                        kind: device.kind,
                        error,
                    });
                }
            }
        }

        if next.entries.is_empty() {
            log::warn!("No device could be locked");
            self.start_watcher(&config);
            return Ok(report);
        }

        log::info!(
            "Locked {} device(s), {} failed",
            next.entries.len(),
            report.failures.len()
        );
        guard(&self.statistics).record_lock(next.entries.len());
        *session = Some(next);
        self.notify(true);
        Ok(report)
    }

    fn acquire(
        &self,
        device: &DeviceDescriptor,
        settings: &UnlockSettings,
        signal: &SignalFn,
    ) -> Result<SessionEntry> {
        match device.kind {
            DeviceKind::Keyboard => {
                let mut forwarder = SelectiveForwarder::open(
                    self.backend.clone(),
                    &device.path,
                    settings.clone(),
                    signal.clone(),
                )?;
                forwarder.start()?;
                Ok(SessionEntry::Forwarder(forwarder))
            }
            DeviceKind::Mouse | DeviceKind::Touchpad | DeviceKind::Touchscreen => {
                let grab = ExclusiveGrab::acquire(self.backend.as_ref(), &device.path, signal.clone())?;
                Ok(SessionEntry::Grab(grab))
            }
            DeviceKind::Unknown => Err(Error::Config(format!(
                "refusing to lock unknown device {}",
                device.path.display()
            ))),
        }
    }

    /// Add one device to the session, starting a session if unlocked.
    fn block_device(&self, path: &Path) -> Result<()> {
        let config = self.config();
        if config.is_whitelisted(path) {
            return Err(Error::Config(format!("{} is whitelisted", path.display())));
        }

        let mut session = guard(&self.session);
        if session.as_ref().is_some_and(|s| s.entries.contains_key(path)) {
            return Ok(());
        }

        let device = self
            .classifier
            .enumerate()?
            .into_iter()
            .find(|device| device.path == path)
            .ok_or_else(|| Error::DeviceOpenFailed {
                path: path.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })?;

        if let Some(current) = session.as_mut() {
            let entry = self.acquire(&device, &current.settings, &current.signal)?;
            log::info!("Blocked {}", device);
            current.entries.insert(device.path, entry);
            return Ok(());
        }

        self.stop_watcher();
        let mut next = self.new_session(&config);
        match self.acquire(&device, &next.settings, &next.signal) {
            Ok(entry) => {
                log::info!("Locked {} on its own", device);
                next.entries.insert(device.path, entry);
            }
            Err(e) => {
                self.start_watcher(&config);
                return Err(e);
            }
        }
        guard(&self.statistics).record_lock(1);
        *session = Some(next);
        self.notify(true);
        Ok(())
    }

    /// Release one device. Releasing the last one ends the session.
    fn unblock_device(&self, path: &Path) -> bool {
        let mut session = guard(&self.session);
        let Some(current) = session.as_mut() else {
            return false;
        };
        if !current.remove(path) {
            return false;
        }
        log::info!("Unblocked {}", path.display());
        if current.entries.is_empty() {
            self.close(&mut session, UnlockTrigger::Manual, true);
        }
        true
    }

    /// Unlock if locked and, when `expected` is given, only if that session
    /// is still the current one.
    fn unlock(&self, expected: Option<u64>, trigger: UnlockTrigger) -> bool {
        self.end_session(expected, trigger, true)
    }

    fn end_session(
        &self,
        expected: Option<u64>,
        trigger: UnlockTrigger,
        restart_watcher: bool,
    ) -> bool {
        let mut session = guard(&self.session);
        let current = session.as_ref().map(|s| s.id);
        if current.is_none() || (expected.is_some() && expected != current) {
            return false;
        }
        self.close(&mut session, trigger, restart_watcher)
    }

    /// Tear down the session in `slot`. The caller holds the session lock,
    /// so the notification is queued before any later transition.
    fn close(
        &self,
        slot: &mut Option<LockSession>,
        trigger: UnlockTrigger,
        restart_watcher: bool,
    ) -> bool {
        let Some(LockSession {
            entries,
            mut suppressed,
            mut dropped,
            ..
        }) = slot.take()
        else {
            return false;
        };

        let devices = entries.len();
        for (path, entry) in entries {
            let (s, d) = entry.shutdown(&path);
            suppressed += s;
            dropped += d;
        }
        log::info!("Unlocked by {} ({} device(s) released)", trigger, devices);
        guard(&self.statistics).record_unlock(trigger, devices, suppressed, dropped);

        if restart_watcher {
            self.start_watcher(&self.config());
        }
        self.notify(false);
        true
    }

    fn device_lost(&self, expected: u64, path: &Path) {
        let mut session = guard(&self.session);
        let Some(current) = session.as_mut().filter(|s| s.id == expected) else {
            return;
        };
        if current.remove(path) {
            log::warn!("{} disconnected while locked", path.display());
        }
        if current.entries.is_empty() {
            self.close(&mut session, UnlockTrigger::DeviceLoss, true);
        }
    }

    fn deadline(&self) -> Option<(u64, Instant)> {
        guard(&self.session)
            .as_ref()
            .and_then(|s| s.deadline.map(|d| (s.id, d)))
    }

    fn notify(&self, locked: bool) {
        guard(&self.subscribers).retain(|tx| tx.send(locked).is_ok());
        #[cfg(feature = "tokio")]
        guard(&self.async_subscribers).retain(|tx| tx.send(locked).is_ok());
        self.request(ControlRequest::Notify(locked));
    }

    /// Act on one dispatcher request; `None` means the timer went off.
    fn handle(&self, request: Option<ControlRequest>) {
        match request {
            None => {
                // The deadline may have been cancelled or moved meanwhile.
                if let Some((session, at)) = self.deadline()
                    && Instant::now() >= at
                {
                    self.unlock(Some(session), UnlockTrigger::Timer);
                }
            }
            Some(ControlRequest::Lock) => {
                if let Err(e) = self.lock(None) {
                    log::error!("Hotkey lock failed: {}", e);
                }
            }
            Some(ControlRequest::Unlock { session, trigger }) => {
                self.unlock(Some(session), trigger);
            }
            Some(ControlRequest::DeviceLost { session, path }) => self.device_lost(session, &path),
            Some(ControlRequest::Notify(locked)) => {
                let listeners: Vec<Listener> = guard(&self.listeners).clone();
                for listener in listeners {
                    listener(locked);
                }
            }
            Some(ControlRequest::TimerChanged | ControlRequest::Shutdown) => {}
        }
    }

    /// Bring the watcher back after a request panicked mid-lock.
    fn recover(&self) {
        let session = guard(&self.session);
        if session.is_none() {
            self.start_watcher(&self.config());
        }
    }
}

fn dispatch(inner: Arc<Inner>, requests: Receiver<ControlRequest>) {
    loop {
        let request = match inner.deadline() {
            Some((_, at)) => requests.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => requests.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let request = match request {
            Ok(ControlRequest::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(request) => Some(request),
            Err(RecvTimeoutError::Timeout) => None,
        };

        // Devices acquired before a panic are released as it unwinds.
        if panic::catch_unwind(AssertUnwindSafe(|| inner.handle(request))).is_err() {
            log::error!("Lock request panicked; dispatcher continues");
            inner.recover();
        }
    }
    log::debug!("Lock dispatcher exited");
}

/// Locks and unlocks input devices.
///
/// Construct one per process and share it by reference; there is no global
/// instance.
pub struct LockController {
    inner: Arc<Inner>,
    dispatcher: Option<JoinHandle<()>>,
}

impl LockController {
    /// A controller with default settings that are never persisted.
    pub fn new(backend: Arc<dyn InputBackend>) -> Result<Self> {
        Self::with_config(backend, Arc::new(MemoryStore::default()))
    }

    /// A controller whose settings come from `store`.
    ///
    /// An unreadable or invalid configuration falls back to defaults, and
    /// any value replaced that way is written back.
    pub fn with_config(backend: Arc<dyn InputBackend>, store: Arc<dyn ConfigStore>) -> Result<Self> {
        let classifier = Arc::new(DeviceClassifier::new(backend));
        Self::with_classifier(classifier, store)
    }

    /// Like [`with_config`](Self::with_config) with a custom classifier.
    pub fn with_classifier(
        classifier: Arc<DeviceClassifier>,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        let config = load_normalized(store.as_ref());
        let (tx, rx) = mpsc::channel();

        let lock_requests = tx.clone();
        let watcher = GlobalHotkeyWatcher::new(
            classifier.clone(),
            config.hotkey(),
            config.trigger_mode,
            Arc::new(move || {
                if lock_requests.send(ControlRequest::Lock).is_err() {
                    log::error!("Lock dispatcher is gone; hotkey ignored");
                }
            }),
        );

        let inner = Arc::new(Inner {
            backend: classifier.backend().clone(),
            classifier,
            store,
            config: RwLock::new(config.clone()),
            session: Mutex::new(None),
            next_session: AtomicU64::new(1),
            watcher,
            requests: tx,
            listeners: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            #[cfg(feature = "tokio")]
            async_subscribers: Mutex::new(Vec::new()),
            statistics: Mutex::new(LockStatistics::new()),
        });

        let dispatcher_inner = inner.clone();
        let dispatcher = thread::Builder::new()
            .name("inputlock-dispatch".into())
            .spawn(move || dispatch(dispatcher_inner, rx))
            .map_err(|e| Error::ThreadError(format!("failed to spawn dispatcher: {e}")))?;

        inner.start_watcher(&config);
        Ok(Self {
            inner,
            dispatcher: Some(dispatcher),
        })
    }

    /// Lock every device of the configured kinds.
    ///
    /// Does nothing if already locked. Per-device failures are reported,
    /// not returned; an error means devices could not be enumerated at all.
    pub fn lock(&self) -> Result<LockReport> {
        self.inner.lock(None)
    }

    /// Lock only devices of the given kinds. Touchscreens are locked only
    /// if listed.
    pub fn lock_report_by_types(&self, kinds: &BTreeSet<DeviceKind>) -> Result<LockReport> {
        self.inner.lock(Some(kinds))
    }

    /// Like [`lock_report_by_types`](Self::lock_report_by_types), returning
    /// whether the controller is locked afterwards.
    pub fn lock_by_types(&self, kinds: &BTreeSet<DeviceKind>) -> bool {
        match self.lock_report_by_types(kinds) {
            Ok(report) => report.is_locked(),
            Err(e) => {
                log::warn!("Lock failed: {}", e);
                false
            }
        }
    }

    /// Release every device. Never fails; returns whether anything was locked.
    pub fn unlock(&self) -> bool {
        self.inner.unlock(None, UnlockTrigger::Manual)
    }

    /// Lock if unlocked, unlock if locked. Returns the new state.
    pub fn toggle(&self) -> Result<bool> {
        if self.is_locked() {
            self.unlock();
            Ok(false)
        } else {
            Ok(self.lock()?.is_locked())
        }
    }

    pub fn is_locked(&self) -> bool {
        guard(&self.inner.session).is_some()
    }

    /// Paths of every device the current session holds.
    pub fn blocked_device_paths(&self) -> BTreeSet<PathBuf> {
        guard(&self.inner.session)
            .as_ref()
            .map(|s| s.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the current session holds `path`.
    pub fn is_device_blocked(&self, path: impl AsRef<Path>) -> bool {
        guard(&self.inner.session)
            .as_ref()
            .is_some_and(|s| s.entries.contains_key(path.as_ref()))
    }

    /// Block a single device, whatever its kind.
    ///
    /// Joins the running session, or starts a session holding only this
    /// device. Blocking a device already held does nothing. Whitelisted and
    /// unknown devices are refused.
    pub fn block_device(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.block_device(path.as_ref())
    }

    /// Release a single device. Releasing the last held device unlocks.
    /// Returns whether the device was held.
    pub fn unblock_device(&self, path: impl AsRef<Path>) -> bool {
        self.inner.unblock_device(path.as_ref())
    }

    /// Block the device if free, release it if held. Returns whether it is
    /// blocked afterwards.
    pub fn toggle_device(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if self.inner.unblock_device(path) {
            Ok(false)
        } else {
            self.inner.block_device(path)?;
            Ok(true)
        }
    }

    /// Scan and classify input devices afresh.
    pub fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.inner.classifier.enumerate()
    }

    pub fn classifier(&self) -> &DeviceClassifier {
        &self.inner.classifier
    }

    /// Lock, then unlock automatically after `duration`.
    ///
    /// If already locked, the running session gets the new deadline.
    pub fn lock_for(&self, duration: Duration) -> Result<LockReport> {
        let report = self.lock()?;
        if let Some(session) = guard(&self.inner.session).as_mut() {
            session.deadline = Some(Instant::now() + duration);
            log::info!("Unlocking automatically in {:?}", duration);
        }
        self.inner.request(ControlRequest::TimerChanged);
        Ok(report)
    }

    /// Drop the automatic unlock deadline. Returns whether one was set.
    pub fn cancel_timer(&self) -> bool {
        let cancelled = guard(&self.inner.session)
            .as_mut()
            .and_then(|s| s.deadline.take())
            .is_some();
        if cancelled {
            self.inner.request(ControlRequest::TimerChanged);
        }
        cancelled
    }

    /// Time left until the automatic unlock.
    pub fn timer_remaining(&self) -> Option<Duration> {
        self.inner
            .deadline()
            .map(|(_, at)| at.saturating_duration_since(Instant::now()))
    }

    /// The active configuration.
    pub fn config(&self) -> LockConfig {
        self.inner.config()
    }

    fn update_config(&self, update: impl FnOnce(&mut LockConfig)) -> LockConfig {
        let config = {
            let mut config = self
                .inner
                .config
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            update(&mut config);
            config.clone()
        };
        self.inner.persist(&config);
        config
    }

    fn apply_watcher_settings(&self, config: &LockConfig) {
        // Holding the session keeps a concurrent lock from racing the restart.
        let _session = guard(&self.inner.session);
        if let Err(e) = self
            .inner
            .watcher
            .set_hotkey(config.hotkey(), config.trigger_mode)
        {
            log::warn!("Failed to restart hotkey watcher: {}", e);
        }
    }

    /// Set the hotkey. An invalid chord is replaced by the default, which is
    /// what gets stored and returned. Takes effect from the next lock.
    pub fn set_hotkey(&self, chord: &str) -> Hotkey {
        let (hotkey, _) = Hotkey::parse_or_default(chord);
        let config = self.update_config(|config| config.hotkey = hotkey.to_string());
        self.apply_watcher_settings(&config);
        hotkey
    }

    /// Set the unlock pattern. Unknown ids are replaced by the default.
    /// Takes effect from the next lock.
    pub fn set_pattern(&self, id: &str) -> UnlockPattern {
        let (pattern, _) = UnlockPattern::from_id_or_default(id);
        self.update_config(|config| config.unlock_pattern = pattern.id().to_string());
        pattern
    }

    pub fn set_trigger_mode(&self, mode: TriggerMode) {
        let config = self.update_config(|config| config.trigger_mode = mode);
        self.apply_watcher_settings(&config);
    }

    /// Device kinds a plain [`lock`](Self::lock) blocks.
    pub fn set_block_kinds(&self, kinds: BTreeSet<DeviceKind>) {
        self.update_config(|config| config.block_kinds = kinds);
    }

    pub fn set_whitelist(&self, paths: BTreeSet<PathBuf>) {
        self.update_config(|config| config.whitelist = paths);
    }

    /// Turn the passive lock hotkey on or off.
    pub fn set_global_hotkey(&self, enabled: bool) {
        let config = self.update_config(|config| config.global_hotkey = enabled);
        let session = guard(&self.inner.session);
        if !enabled {
            self.inner.stop_watcher();
        } else if session.is_none() {
            self.inner.start_watcher(&config);
        }
    }

    /// Re-read the configuration store.
    pub fn reload_config(&self) -> Result<()> {
        let mut config = self.inner.store.load()?;
        if config.normalize().any() {
            self.inner.persist(&config);
        }
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.apply_watcher_settings(&config);
        Ok(())
    }

    /// Whether the passive hotkey watcher is listening.
    pub fn is_watching(&self) -> bool {
        self.inner.watcher.is_running()
    }

    /// Call `callback` on every lock-state transition.
    ///
    /// Callbacks run on the dispatcher thread, in transition order, and
    /// must not block.
    pub fn on_lock_state_changed<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        guard(&self.inner.listeners).push(Arc::new(callback));
    }

    /// A channel that receives the new state on every transition.
    pub fn subscribe(&self) -> Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        guard(&self.inner.subscribers).push(tx);
        rx
    }

    /// Async version of [`subscribe`](Self::subscribe).
    #[cfg(feature = "tokio")]
    pub fn subscribe_async(&self) -> tokio::sync::mpsc::UnboundedReceiver<bool> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        guard(&self.inner.async_subscribers).push(tx);
        rx
    }

    /// Statistics accumulated since construction or the last reset.
    pub fn statistics(&self) -> LockStatistics {
        guard(&self.inner.statistics).clone()
    }

    /// Zero every counter. A running session keeps being timed from now.
    pub fn reset_statistics(&self) {
        guard(&self.inner.statistics).reset();
    }
}

impl Drop for LockController {
    fn drop(&mut self) {
        self.inner.end_session(None, UnlockTrigger::Manual, false);
        self.inner.stop_watcher();
        self.inner.request(ControlRequest::Shutdown);
        if let Some(handle) = self.dispatcher.take()
            && handle.join().is_err()
        {
            log::error!("Lock dispatcher panicked");
        }
    }
}

fn load_normalized(store: &dyn ConfigStore) -> LockConfig {
    let mut config = store.load().unwrap_or_else(|e| {
        log::warn!("Failed to load configuration, using defaults: {}", e);
        LockConfig::default()
    });
    let changed = config.normalize();
    if changed.any() {
        log::info!("Configuration normalized, writing back");
        if let Err(e) = store.save(&config) {
            log::warn!("Failed to save configuration: {}", e);
        }
    }
    config
}
