//! Full-block grabs for pointing devices.
//!
//! Mice, touchpads and (when asked for) touchscreens are grabbed and
//! drained without forwarding anything. The drain thread keeps the kernel
//! buffer from filling up while the device is held.

use crate::backend::{InputBackend, InputSource};
use crate::error::{Error, Result};
use crate::forwarder::{ReaderSignal, SignalFn, file_label};
use crate::platform::poll::{POLL_TIMEOUT, wait_readable};
use evdev::EventType;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// An exclusively held device whose events are discarded.
pub struct ExclusiveGrab {
    path: PathBuf,
    name: String,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl ExclusiveGrab {
    /// Open and grab `path`.
    pub fn acquire(backend: &dyn InputBackend, path: &Path, signal: SignalFn) -> Result<Self> {
        let source = backend.open(path)?;
        Self::from_source(source, signal)
    }

    /// Grab an already opened device and start draining it.
    pub fn from_source(mut source: Box<dyn InputSource>, signal: SignalFn) -> Result<Self> {
        let path = source.path().to_path_buf();
        let name = source.name().to_string();

        source
            .grab()
            .map_err(|e| Error::ExclusiveAcquireFailed {
                path: path.clone(),
                source: e,
            })?;

        let running = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));
        let drain = Drain {
            source,
            running: Arc::clone(&running),
            dropped: Arc::clone(&dropped),
            signal,
        };

        let thread = thread::Builder::new()
            .name(format!("inputlock-grab-{}", file_label(&path)))
            .spawn(move || drain.run())
            .map_err(|e| Error::ThreadError(format!("failed to spawn drain thread: {e}")))?;

        log::info!("Blocking {} ({})", name, path.display());
        Ok(Self {
            path,
            name,
            running,
            dropped,
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the drain thread is still holding the device.
    pub fn is_active(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Events discarded so far, excluding sync markers.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop draining and ungrab. Blocks for at most one poll cycle.
    pub fn release(&mut self) -> Result<()> {
        let Some(handle) = self.thread.take() else {
            return Err(Error::NotRunning);
        };
        self.running.store(false, Ordering::SeqCst);
        handle
            .join()
            .map_err(|_| Error::ThreadError(format!("drain thread for {} panicked", self.path.display())))
    }
}

impl Drop for ExclusiveGrab {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

struct Drain {
    source: Box<dyn InputSource>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    signal: SignalFn,
}

impl Drain {
    fn run(mut self) {
        let result = self.pump();
        if let Err(e) = self.source.ungrab() {
            log::debug!("Ungrab of {} failed: {}", self.source.path().display(), e);
        }
        if let Err(e) = result {
            log::warn!("Lost {}: {}", self.source.path().display(), e);
            (self.signal)(self.source.path(), ReaderSignal::Disconnected);
        }
    }

    fn pump(&mut self) -> io::Result<()> {
        let fd = self.source.as_raw_fd();
        while self.running.load(Ordering::SeqCst) {
            if wait_readable(&[fd], POLL_TIMEOUT)?.is_empty() {
                continue;
            }
            let count = self
                .source
                .fetch()?
                .iter()
                .filter(|ev| ev.event_type() != EventType::SYNCHRONIZATION)
                .count();
            self.dropped.fetch_add(count as u64, Ordering::Relaxed);
        }
        Ok(())
    }
}
