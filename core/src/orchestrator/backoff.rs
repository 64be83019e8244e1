//! Poll delay policy
//!
//! Linear growth with a hard cap, driven only by the iteration counter.

use std::time::Duration;

/// Delay added per poll iteration
pub const BASE_UNIT: Duration = Duration::from_millis(500);

/// Longest wait between two polls
pub const CAP: Duration = Duration::from_secs(5);

/// Delay before poll number `n` (starting at 1): `min(n * 0.5s, 5s)`.
pub fn backoff(n: u32) -> Duration {
    BASE_UNIT.saturating_mul(n).min(CAP)
}
