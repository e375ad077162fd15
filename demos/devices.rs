//! List input devices and how they would be treated by a lock.
//!
//! Run with: cargo run --example devices
//!
//! Note: reading /dev/input usually requires root or the `input` group.

use inputlock::{DeviceClassifier, LockConfig, platform::EvdevBackend};
use std::sync::Arc;

fn main() {
    println!("inputlock device list");
    println!("=====================\n");

    let classifier = DeviceClassifier::new(Arc::new(EvdevBackend::new()));
    let devices = match classifier.refresh() {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("Failed to enumerate devices: {}", e);
            std::process::exit(1);
        }
    };

    let config = LockConfig::default();
    for device in &devices {
        let action = if config.block_kinds.contains(&device.kind) {
            "locked"
        } else {
            "left alone"
        };
        println!(
            "{:<22} {:<12} {:<40} {}",
            device.path.display(),
            device.kind.as_str(),
            device.name,
            action
        );
    }

    let summary = classifier.summary();
    println!(
        "\n{} device(s): {} keyboard(s), {} mouse/mice, {} touchpad(s), {} touchscreen(s), {} unknown",
        summary.total,
        summary.keyboards,
        summary.mice,
        summary.touchpads,
        summary.touchscreens,
        summary.unknown
    );
}
