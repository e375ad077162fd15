//! Follow lock-state changes from async code.
//!
//! Run with: cargo run --example state_async --features tokio
//!
//! Locks for 30 seconds and prints each transition as it arrives.

use inputlock::{LockController, platform::EvdevBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

#[tokio::main]
async fn main() {
    println!("inputlock state example (async/tokio)");
    println!("=====================================\n");

    let controller =
        LockController::new(Arc::new(EvdevBackend::new())).expect("Failed to start controller");
    let mut rx = controller.subscribe_async();

    match controller.lock_for(Duration::from_secs(30)) {
        Ok(report) if report.is_locked() => {
            println!("Locked {} device(s) for 30s", report.acquired.len())
        }
        Ok(_) => {
            eprintln!("Nothing could be locked");
            return;
        }
        Err(e) => {
            eprintln!("Lock failed: {}", e);
            return;
        }
    }

    let mut heartbeat = interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            state = rx.recv() => {
                match state {
                    Some(true) => println!("Locked"),
                    Some(false) => {
                        println!("Unlocked");
                        break;
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if let Some(remaining) = controller.timer_remaining() {
                    println!("... {}s left", remaining.as_secs());
                }
            }
        }
    }

    println!("\n{}", controller.statistics().summary());
}
