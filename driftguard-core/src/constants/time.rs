//! Time Constants for DriftGuard
//!
//! Unit conversions for the nanosecond timestamp scale assumed by the default
//! engine configurations. The core itself is unit-agnostic; callers using a
//! different clock scale must rescale the duration fields of each config.

/// Nanoseconds per millisecond.
pub const NS_PER_MS: u64 = 1_000_000;

/// Nanoseconds per second.
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds per minute.
pub const NS_PER_MIN: u64 = 60 * NS_PER_SEC;

/// Nanoseconds per hour.
pub const NS_PER_HOUR: u64 = 60 * NS_PER_MIN;
