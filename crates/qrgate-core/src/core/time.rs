// crates/qrgate-core/src/core/time.rs
// ============================================================================
// Module: QR Gate Time Model
// Description: Wall-clock timestamps, clock sources, and fixed window math.
// Purpose: Keep TTL and window arithmetic explicit and replayable in tests.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every component reads time through a [`Clock`] injected at construction,
//! never through `SystemTime` directly. Tests drive a [`ManualClock`] so window
//! rollover and TTL expiry are deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length of the minute window in milliseconds.
pub const MINUTE_MS: i64 = 60_000;
/// Length of the day window in milliseconds.
pub const DAY_MS: i64 = 86_400_000;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Unix epoch milliseconds.
///
/// # Invariants
/// - Arithmetic saturates instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Builds a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(value: i64) -> Self {
        Self(value)
    }

    /// Returns the unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns this timestamp moved forward by `duration`.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(duration)))
    }

    /// Returns this timestamp moved backward by `duration`.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }

    /// Returns the time remaining from `self` until `later` (zero if already passed).
    #[must_use]
    pub fn until(self, later: Self) -> Duration {
        let delta = later.0.saturating_sub(self.0);
        u64::try_from(delta).map_or(Duration::ZERO, Duration::from_millis)
    }
}

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// SECTION: Fixed Windows
// ============================================================================

/// Wall-clock aligned counting windows.
///
/// # Invariants
/// - Window starts are multiples of the window length since the unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedWindow {
    /// Calendar minute.
    Minute,
    /// UTC calendar day.
    Day,
}

impl FixedWindow {
    /// Returns the window length in milliseconds.
    #[must_use]
    pub const fn length_ms(self) -> i64 {
        match self {
            Self::Minute => MINUTE_MS,
            Self::Day => DAY_MS,
        }
    }

    /// Returns the start of the window containing `at`.
    #[must_use]
    pub const fn start_of(self, at: Timestamp) -> Timestamp {
        let millis = at.as_unix_millis();
        Timestamp::from_unix_millis(millis - millis.rem_euclid(self.length_ms()))
    }

    /// Returns the first instant of the next window after the one containing `at`.
    #[must_use]
    pub const fn end_of(self, at: Timestamp) -> Timestamp {
        Timestamp::from_unix_millis(
            self.start_of(at).as_unix_millis().saturating_add(self.length_ms()),
        )
    }

    /// Returns a stable label for the window.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Day => "day",
        }
    }
}

// ============================================================================
// SECTION: Clocks
// ============================================================================

/// Time source for TTL and window arithmetic.
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the operating system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp::from_unix_millis(duration_millis(millis))
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current time in unix milliseconds.
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub const fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_unix_millis()),
        }
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.as_unix_millis(), Ordering::SeqCst);
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.millis.fetch_add(duration_millis(duration), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.millis.load(Ordering::SeqCst))
    }
}
