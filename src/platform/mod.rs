//! Platform-specific implementations.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub mod poll;

#[cfg(all(test, target_os = "linux"))]
pub mod mock;

#[cfg(target_os = "linux")]
pub use linux::{EvdevBackend, EvdevSource};

// evdev grabs and uinput only exist on Linux
#[cfg(not(target_os = "linux"))]
compile_error!("inputlock only supports Linux");
