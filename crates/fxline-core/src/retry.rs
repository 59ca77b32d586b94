//! Bounded retry with fixed backoff

use std::time::Duration;

use crate::clock::Clock;

/// Retry a fallible operation up to `max_attempts` times total.
///
/// Between attempts the calling execution sleeps `backoff` on `clock`.
/// Non-retryable errors return immediately. On exhaustion the final error is
/// returned together with the number of attempts made.
pub fn retry_fixed<T, E: std::fmt::Display>(
    label: &str,
    max_attempts: u32,
    backoff: Duration,
    clock: &dyn Clock,
    is_retryable: impl Fn(&E) -> bool,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, (E, u32)> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                log::debug!("{label}: attempt {attempt}/{max_attempts} failed: {e}, retrying...");
                clock.sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}
