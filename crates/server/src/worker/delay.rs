//! Transfer delay that spreads simultaneous uploads from the fleet.

use rand::Rng;
use std::time::Duration;

/// Delay before a hub's upload completes, growing with the square of the
/// staged size: `max(min, MB² / 7200)` seconds, capped at `max`.
pub fn transfer_delay(bytes: u64, min: Duration, max: Duration) -> Duration {
    let megabytes = bytes as f64 / 1_000_000.0;
    let seconds = (megabytes * megabytes / 7200.0)
        .max(min.as_secs_f64())
        .min(max.as_secs_f64());
    Duration::from_secs_f64(seconds.max(0.0))
}

/// Split `total` uniformly at random into the waits before and after the
/// transfer.
pub fn split_delay<R: Rng>(total: Duration, rng: &mut R) -> (Duration, Duration) {
    if total.is_zero() {
        return (Duration::ZERO, Duration::ZERO);
    }
    let pre = Duration::from_secs_f64(rng.random_range(0.0..=total.as_secs_f64()));
    let pre = pre.min(total);
    (pre, total - pre)
}
