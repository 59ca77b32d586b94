//! Graceful shutdown support via atomic flag
//!
//! Checked by the daily refresh loop between partitions and while idling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Global shutdown flag — set by SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Request shutdown (for signal handlers)
pub fn request_shutdown() {
    shutdown_flag().store(true, Ordering::Relaxed);
}

/// Sleep for `total` in `tick` slices, waking early on shutdown.
///
/// Returns `false` if shutdown was requested before `total` elapsed.
pub fn idle_until(total: Duration, tick: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if is_shutdown_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(tick.min(deadline - now));
    }
}
