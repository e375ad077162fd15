//! Error types for the input lock engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for inputlock operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while enumerating, grabbing or forwarding devices.
#[derive(Debug, Error)]
pub enum Error {
    /// The device node could not be opened (permissions, or it was unplugged).
    #[error("failed to open {}: {source}", path.display())]
    DeviceOpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Another process holds the grab, or the kernel refused it.
    #[error("failed to grab {}: {source}", path.display())]
    ExclusiveAcquireFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The uinput pass-through device for a keyboard could not be created.
    #[error("failed to create synthetic device for {}: {source}", path.display())]
    SyntheticDeviceCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The hotkey string does not describe a usable chord.
    #[error("invalid hotkey: {0}")]
    InvalidHotkey(String),

    /// The unlock pattern id is not known.
    #[error("invalid unlock pattern: {0}")]
    InvalidPattern(String),

    /// The component is already running.
    #[error("already running")]
    AlreadyRunning,

    /// The component is not running.
    #[error("not running")]
    NotRunning,

    /// No keyboard could be opened for listening.
    #[error("no keyboard devices available")]
    NoKeyboards,

    /// The operation requires access the process does not have.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Thread-related error.
    #[error("thread error: {0}")]
    ThreadError(String),

    /// Configuration could not be read or written.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The device path this error refers to, if any.
    pub fn device_path(&self) -> Option<&std::path::Path> {
        match self {
            Error::DeviceOpenFailed { path, .. }
            | Error::ExclusiveAcquireFailed { path, .. }
            | Error::SyntheticDeviceCreateFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}
