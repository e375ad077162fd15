//! Passive hotkey listener used while unlocked.
//!
//! The watcher reads every keyboard without grabbing it, so typing is not
//! affected. When the configured chord fires it invokes its trigger
//! callback, which normally asks the controller to lock.
//!
//! It must be stopped before any keyboard is grabbed, otherwise it would
//! hold handles to devices another reader now owns.

use crate::backend::InputSource;
use crate::device::{DeviceClassifier, DeviceKind};
use crate::error::{Error, Result};
use crate::hotkey::{Hotkey, HotkeyMatcher, TriggerMode};
use crate::keycode::KEY_RELEASE;
use crate::platform::poll::{POLL_TIMEOUT, wait_readable};
use evdev::InputEventKind;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

/// Callback invoked on the watcher thread when the chord fires.
pub type TriggerFn = Arc<dyn Fn() + Send + Sync>;

/// Listens for the hotkey on all keyboards while nothing is locked.
pub struct GlobalHotkeyWatcher {
    classifier: Arc<DeviceClassifier>,
    settings: Mutex<(Hotkey, TriggerMode)>,
    on_trigger: TriggerFn,
    running: Arc<AtomicBool>,
    thread_handle: RwLock<Option<JoinHandle<()>>>,
}

impl GlobalHotkeyWatcher {
    pub fn new(
        classifier: Arc<DeviceClassifier>,
        hotkey: Hotkey,
        mode: TriggerMode,
        on_trigger: TriggerFn,
    ) -> Self {
        Self {
            classifier,
            settings: Mutex::new((hotkey, mode)),
            on_trigger,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: RwLock::new(None),
        }
    }

    /// Open every keyboard and start listening in a background thread.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        // A previous thread that exited on its own still has to be joined.
        self.join_finished();

        let sources = match self.open_keyboards() {
            Ok(sources) => sources,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (hotkey, mode) = self.settings();
        log::info!(
            "Watching {} keyboard(s) for {}",
            sources.len(),
            hotkey
        );
        let matcher = HotkeyMatcher::new(hotkey, mode);
        let running = self.running.clone();
        let on_trigger = self.on_trigger.clone();

        let spawned = thread::Builder::new()
            .name("inputlock-watcher".into())
            .spawn(move || {
                watch(&running, sources, matcher, on_trigger);
                running.store(false, Ordering::SeqCst);
            });
        match spawned {
            Ok(handle) => {
                *self
                    .thread_handle
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(Error::ThreadError(format!("failed to spawn watcher: {e}")))
            }
        }
    }

    fn open_keyboards(&self) -> Result<Vec<Box<dyn InputSource>>> {
        let backend = self.classifier.backend();
        let mut sources = Vec::new();
        for device in self.classifier.enumerate()? {
            if device.kind != DeviceKind::Keyboard {
                continue;
            }
            match backend.open(&device.path) {
                Ok(source) => sources.push(source),
                Err(e) => log::warn!("Watcher skipping {}: {}", device.name, e),
            }
        }
        if sources.is_empty() {
            return Err(Error::NoKeyboards);
        }
        Ok(sources)
    }

    /// Stop listening and close every keyboard handle.
    pub fn stop(&self) -> Result<()> {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        let handle = self
            .thread_handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::ThreadError("failed to join watcher thread".into())),
            None if was_running => Ok(()),
            None => Err(Error::NotRunning),
        }
    }

    fn join_finished(&self) {
        let mut guard = self
            .thread_handle
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|h| h.is_finished())
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
    }

    /// Check if the watcher thread is listening.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> (Hotkey, TriggerMode) {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the chord, restarting the listener if it is running.
    pub fn set_hotkey(&self, hotkey: Hotkey, mode: TriggerMode) -> Result<()> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = (hotkey, mode);
        if self.is_running() {
            self.stop()?;
            self.start()?;
        }
        Ok(())
    }
}

impl Drop for GlobalHotkeyWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn watch(
    running: &AtomicBool,
    mut sources: Vec<Box<dyn InputSource>>,
    mut matcher: HotkeyMatcher,
    on_trigger: TriggerFn,
) {
    while running.load(Ordering::SeqCst) {
        let fds: Vec<RawFd> = sources.iter().map(|s| s.as_raw_fd()).collect();
        let ready = match wait_readable(&fds, POLL_TIMEOUT) {
            Ok(ready) => ready,
            Err(e) => {
                log::error!("Watcher poll failed: {}", e);
                return;
            }
        };

        let mut lost = Vec::new();
        for index in ready {
            let events = match sources[index].fetch() {
                Ok(events) => events,
                Err(e) => {
                    log::warn!("Watcher lost {}: {}", sources[index].path().display(), e);
                    lost.push(index);
                    continue;
                }
            };
            for event in events {
                if let InputEventKind::Key(key) = event.kind()
                    && matcher.feed(key.code(), event.value() != KEY_RELEASE)
                {
                    log::info!("Lock hotkey {} pressed", matcher.hotkey());
                    on_trigger();
                }
            }
        }

        for index in lost.into_iter().rev() {
            sources.remove(index);
        }
        if sources.is_empty() {
            log::warn!("Watcher has no keyboards left, stopping");
            return;
        }
    }
}
