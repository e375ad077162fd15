//! # inputlock
//!
//! Selective input locking for Linux, built on evdev grabs and uinput.
//!
//! ## Features
//!
//! - Keyboards are grabbed and mirrored through a synthetic device that only
//!   passes the unlock hotkey and unlock-pattern keys
//! - Mice and touchpads are grabbed and drained; touchscreens on request
//! - Unlock by hotkey chord, by key pattern, by timer or programmatically
//! - Passive hotkey watcher that locks again while unlocked
//! - Partial success: a device that cannot be grabbed is reported, the rest
//!   stay locked
//!
//! ## Quick Start
//!
//! ```no_run
//! use inputlock::{LockController, platform::EvdevBackend};
//! use std::sync::Arc;
//!
//! # fn main() -> inputlock::Result<()> {
//! let controller = LockController::new(Arc::new(EvdevBackend::new()))?;
//! let state = controller.subscribe();
//!
//! let report = controller.lock()?;
//! println!("locked {} device(s)", report.acquired.len());
//!
//! // Ctrl+Alt+L or Up, Up, Down, Down, Enter unlocks.
//! while state.recv() == Ok(true) {}
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Every grabbed device has its own reader thread that polls with a short
//! timeout. Readers never touch controller state: they post requests to the
//! controller's dispatcher thread, which performs the unlock and delivers
//! state-change callbacks. Devices are reached through the
//! [`InputBackend`](backend::InputBackend) trait, so the engine can run
//! against something other than `/dev/input`.
//!
//! Access to `/dev/input/event*` and `/dev/uinput` usually requires root or
//! membership in the `input` group.

pub mod backend;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod forwarder;
pub mod grab;
pub mod hotkey;
pub mod keycode;
pub mod pattern;
pub mod platform;
pub mod statistics;
pub mod watcher;

// Re-exports
pub use backend::{InputBackend, InputSource, SyntheticDevice};
pub use config::{ConfigStore, JsonFileStore, LockConfig, MemoryStore};
pub use controller::{DeviceFailure, LockController, LockReport, UnlockTrigger};
pub use device::{DeviceClassifier, DeviceDescriptor, DeviceKind, NamePatterns};
pub use error::{Error, Result};
pub use forwarder::{SelectiveForwarder, UnlockSettings};
pub use grab::ExclusiveGrab;
pub use hotkey::{Hotkey, HotkeyMatcher, TriggerMode};
pub use pattern::{PatternMatcher, UnlockPattern};
pub use statistics::LockStatistics;
pub use watcher::GlobalHotkeyWatcher;
