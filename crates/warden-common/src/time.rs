// ============================================
// File: crates/warden-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Signed commands carry a wall-clock timestamp that the agent compares to
//! its own clock, and sessions track activity without taking locks. Both
//! needs live here.
//!
//! ## Main Functionality
//! - `Timestamp`: Unix time in **milliseconds** with drift checks
//! - `AtomicInstant`: Lock-free monotonic instant for activity tracking
//!
//! ## ⚠️ Important Note for Next Developer
//! - Wire timestamps are milliseconds (`1737820800000`), not seconds
//! - Drift checks are symmetric: future timestamps are as stale as old ones
//! - `AtomicInstant` stores nanoseconds since process start in an `AtomicU64`
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================
// Constants
// ============================================

/// Minimum plausible timestamp (2020-01-01T00:00:00Z) in milliseconds.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 1_577_836_800_000;

/// Maximum plausible timestamp (2100-01-01T00:00:00Z) in milliseconds.
pub const MAX_VALID_TIMESTAMP_MS: i64 = 4_102_444_800_000;

// ============================================
// AtomicInstant
// ============================================

/// Last-activity clock shared between the read loop and admin snapshots.
///
/// Holds nanoseconds since a process-wide origin so it fits in one atomic.
///
/// # Example
/// ```
/// use warden_common::time::AtomicInstant;
///
/// let seen = AtomicInstant::now();
/// seen.touch();
/// assert!(seen.elapsed().as_secs() < 1);
/// ```
#[derive(Debug)]
pub struct AtomicInstant {
    nanos: AtomicU64,
}

impl AtomicInstant {
    fn origin() -> Instant {
        use std::sync::OnceLock;
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        *ORIGIN.get_or_init(Instant::now)
    }

    fn since_origin() -> u64 {
        u64::try_from(Self::origin().elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Starts the clock at the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self {
            nanos: AtomicU64::new(Self::since_origin()),
        }
    }

    /// Records activity now and returns the time since the previous touch.
    pub fn touch(&self) -> Duration {
        let now = Self::since_origin();
        let previous = self.nanos.swap(now, Ordering::Relaxed);
        Duration::from_nanos(now.saturating_sub(previous))
    }

    /// Time since the last touch.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let last = self.nanos.load(Ordering::Relaxed);
        Duration::from_nanos(Self::since_origin().saturating_sub(last))
    }
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self::now()
    }
}

// ============================================
// Timestamp
// ============================================

/// Unix timestamp in milliseconds.
///
/// Serialized as a bare JSON integer so it can sit inside signed command
/// envelopes unchanged.
///
/// # Example
/// ```
/// use warden_common::time::Timestamp;
/// use std::time::Duration;
///
/// let now = Timestamp::now();
/// assert!(now.is_valid());
/// assert!(now.is_within(now, Duration::from_secs(1)));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a new timestamp from Unix milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Creates a timestamp for the current wall-clock time.
    ///
    /// A clock set before the epoch yields `0`, which every drift check
    /// then rejects.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Self(millis)
    }

    /// Returns the Unix timestamp in milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Checks if the timestamp is within plausible bounds (2020-2100).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 >= MIN_VALID_TIMESTAMP_MS && self.0 <= MAX_VALID_TIMESTAMP_MS
    }

    /// Absolute distance between two timestamps.
    #[must_use]
    pub fn distance(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }

    /// Returns `true` if `|self - reference| <= max_drift`.
    #[must_use]
    pub fn is_within(&self, reference: Self, max_drift: Duration) -> bool {
        self.distance(reference) <= max_drift
    }

    /// Returns a timestamp `duration` later than this one.
    #[must_use]
    pub fn plus(&self, duration: Duration) -> Self {
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(delta))
    }

    /// Returns a timestamp `duration` earlier than this one.
    #[must_use]
    pub fn minus(&self, duration: Duration) -> Self {
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(delta))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_touch_resets_idle_time() {
        let seen = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        assert!(seen.elapsed() >= Duration::from_millis(10));
        let idle = seen.touch();
        assert!(idle >= Duration::from_millis(10));
        assert!(seen.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timestamp_now_is_millis() {
        let ts = Timestamp::now();
        assert!(ts.is_valid());
        // Seconds-resolution values would sit far below the lower bound.
        assert!(!Timestamp::from_millis(1_737_820_800).is_valid());
        assert!(Timestamp::from_millis(1_737_820_800_000).is_valid());
    }

    #[test]
    fn test_drift_is_symmetric() {
        let now = Timestamp::from_millis(1_737_820_800_000);
        let window = Duration::from_secs(300);

        assert!(now.minus(Duration::from_secs(299)).is_within(now, window));
        assert!(now.plus(Duration::from_secs(299)).is_within(now, window));
        assert!(now.minus(window).is_within(now, window));
        assert!(!now.minus(Duration::from_secs(301)).is_within(now, window));
        assert!(!now.plus(Duration::from_secs(301)).is_within(now, window));
    }

    #[test]
    fn test_timestamp_serializes_as_integer() {
        let ts = Timestamp::from_millis(1_737_820_800_000);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1737820800000");
    }
}
