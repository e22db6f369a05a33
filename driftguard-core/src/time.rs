//! Time handling for the calibration core
//!
//! The core never reads a clock. Every entry point takes an explicit caller
//! timestamp, which keeps the algorithms deterministic and testable: feeding
//! the same sample stream twice produces bit-identical results.
//!
//! Timestamps are unsigned integers on a monotonic scale. The unit is chosen
//! by the caller; nanoseconds are assumed by the default configurations in
//! [`crate::constants::time`]. All arithmetic here saturates so that a
//! misbehaving sensor clock degrades into "no time elapsed" rather than a
//! wrap-around panic.

/// Monotonic timestamp supplied by the caller (nanoseconds in practice).
pub type Timestamp = u64;

/// Time span between two [`Timestamp`]s, in the same unit.
pub type Duration = u64;

/// Elapsed time from `since` to `now`, saturating to zero when the clock
/// moved backwards.
#[inline]
pub fn elapsed(now: Timestamp, since: Timestamp) -> Duration {
    now.saturating_sub(since)
}

/// True when `now` precedes `earlier` by more than `tolerance`.
///
/// Used by the gyroscope watchdog to distinguish a genuine clock rollover
/// from ordinary jitter between sensor batches.
#[inline]
pub fn moved_backwards(now: Timestamp, earlier: Timestamp, tolerance: Duration) -> bool {
    earlier > now && earlier - now > tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_saturates() {
        assert_eq!(elapsed(2000, 500), 1500);
        assert_eq!(elapsed(500, 2000), 0);
    }

    #[test]
    fn backwards_detection_respects_tolerance() {
        // Small jitter is not a rollover
        assert!(!moved_backwards(990, 1000, 50));
        // Large reversal is
        assert!(moved_backwards(100, 1000, 50));
        // Forward motion never triggers
        assert!(!moved_backwards(2000, 1000, 50));
    }
}
