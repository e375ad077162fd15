//! Lock keyboard and mouse until the hotkey or pattern is entered.
//!
//! Run with: cargo run --example lock [-- <seconds>]
//!
//! While locked, only Ctrl+Alt+L and Up, Up, Down, Down, Enter get through.
//! With a duration the lock also ends on its own. Ctrl+C in another
//! terminal (or the timer) is the way out if both are unavailable.
//!
//! Note: requires access to /dev/input and /dev/uinput.

use inputlock::{JsonFileStore, LockController, platform::EvdevBackend};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn main() {
    println!("inputlock lock example");
    println!("======================\n");

    let duration = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u64>().ok())
        .map(Duration::from_secs);

    let store = match JsonFileStore::open_default() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("No config location: {}", e);
            std::process::exit(1);
        }
    };
    println!("Config: {}", store.path().display());

    let controller = LockController::with_config(Arc::new(EvdevBackend::new()), Arc::new(store))
        .expect("Failed to start controller");
    let config = controller.config();
    println!("Hotkey: {}", config.hotkey);
    println!("Pattern: {}\n", config.pattern());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        println!("\nStopping...");
    })
    .expect("Error setting Ctrl-C handler");

    controller.on_lock_state_changed(|locked| {
        println!("{}", if locked { "Locked" } else { "Unlocked" });
    });

    let result = match duration {
        Some(duration) => controller.lock_for(duration),
        None => controller.lock(),
    };
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Lock failed: {}", e);
            std::process::exit(1);
        }
    };

    for path in &report.acquired {
        println!("  holding {}", path.display());
    }
    for failure in &report.failures {
        println!(
            "  could not lock {} ({}): {}",
            failure.name,
            failure.path.display(),
            failure.error
        );
    }
    if !report.is_locked() {
        eprintln!("Nothing was locked");
        std::process::exit(1);
    }

    while running.load(Ordering::SeqCst) && controller.is_locked() {
        if let Some(remaining) = controller.timer_remaining() {
            print!("\r{:>4}s left ", remaining.as_secs());
            let _ = std::io::stdout().flush();
        }
        std::thread::sleep(Duration::from_millis(250));
    }

    controller.unlock();
    println!("\n{}", controller.statistics().summary());
}
