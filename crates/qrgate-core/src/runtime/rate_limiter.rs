// crates/qrgate-core/src/runtime/rate_limiter.rs
// ============================================================================
// Module: Rate Limiter
// Description: Per-key fixed-window quota counters for minute and day horizons.
// Purpose: Enforce tier request budgets with linearizable check-and-increment.
// Dependencies: crate::core, crate::runtime::shards, thiserror
// ============================================================================

//! ## Overview
//! Each key owns one [`RateCounter`] holding a minute and a day window, both
//! aligned to UTC epoch multiples. A request is charged to both windows or to
//! neither: the check and the increment happen under the key's shard lock.
//!
//! When both windows are exhausted the day window is reported since it
//! blocks longer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use crate::core::FixedWindow;
use crate::core::RateLimits;
use crate::core::RateUsage;
use crate::core::Timestamp;
use crate::core::WindowUsage;
use crate::runtime::shards::DEFAULT_SHARD_COUNT;
use crate::runtime::shards::Shards;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Rate limiter failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many keys tracked after a sweep.
    #[error("rate limiter full: {0} keys")]
    Capacity(usize),
    /// A shard lock was poisoned.
    #[error("rate limiter lock poisoned")]
    Poisoned,
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Minute and day counters for one key.
///
/// # Invariants
/// - `minute_start` and `day_start` are window-aligned.
/// - Counts never exceed the limits they were charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCounter {
    /// Start of the current minute window.
    pub minute_start: Timestamp,
    /// Requests charged in the minute window.
    pub minute_count: u32,
    /// Start of the current day window.
    pub day_start: Timestamp,
    /// Requests charged in the day window.
    pub day_count: u32,
}

impl RateCounter {
    /// Builds an empty counter for the windows containing `now`.
    #[must_use]
    pub const fn new(now: Timestamp) -> Self {
        Self {
            minute_start: FixedWindow::Minute.start_of(now),
            minute_count: 0,
            day_start: FixedWindow::Day.start_of(now),
            day_count: 0,
        }
    }

    /// Resets any window that `now` has moved past and returns the instant
    /// the counter is charged at.
    ///
    /// Windows only move forward. An instant older than the current minute
    /// window (a clock read that lost a race) is charged at the start of the
    /// current window instead of resetting it.
    pub fn roll(&mut self, now: Timestamp) -> Timestamp {
        let now = now.max(self.minute_start);
        let minute_start = FixedWindow::Minute.start_of(now);
        if minute_start > self.minute_start {
            self.minute_start = minute_start;
            self.minute_count = 0;
        }
        let day_start = FixedWindow::Day.start_of(now);
        if day_start > self.day_start {
            self.day_start = day_start;
            self.day_count = 0;
        }
        now
    }

    /// Returns true when both windows predate the windows containing `now`.
    #[must_use]
    pub fn is_idle(&self, now: Timestamp) -> bool {
        self.day_start < FixedWindow::Day.start_of(now)
    }

    /// Returns the budget snapshot for `limits` at `now`.
    #[must_use]
    pub fn usage(&self, limits: RateLimits, now: Timestamp) -> RateUsage {
        RateUsage {
            minute: window_usage(limits.per_minute, self.minute_count, FixedWindow::Minute, now),
            day: window_usage(limits.per_day, self.day_count, FixedWindow::Day, now),
        }
    }

    /// Returns the window that would overflow if charged, day first.
    fn exceeded(&self, limits: RateLimits) -> Option<FixedWindow> {
        if self.day_count >= limits.per_day {
            Some(FixedWindow::Day)
        } else if self.minute_count >= limits.per_minute {
            Some(FixedWindow::Minute)
        } else {
            None
        }
    }
}

/// Result of a check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateVerdict {
    /// Both windows were charged.
    Allowed(RateUsage),
    /// Neither window was charged.
    Denied {
        /// Exhausted window reported to the caller.
        window: FixedWindow,
        /// Time until that window resets.
        retry_after: Duration,
        /// Budget snapshot at denial.
        usage: RateUsage,
    },
}

/// Shard map type.
type Shard = Mutex<HashMap<String, RateCounter>>;

/// Concurrent per-key rate limiter.
pub struct RateLimiter {
    /// Lock-striped counters.
    shards: Shards<Shard>,
}

impl RateLimiter {
    /// Builds a limiter tracking at most `max_entries` keys.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            shards: Shards::new(DEFAULT_SHARD_COUNT, max_entries, || Mutex::new(HashMap::new())),
        }
    }

    /// Charges one request to `key` if both windows have budget left.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] when the key cannot be tracked or a lock is
    /// poisoned.
    pub fn check_and_increment(
        &self,
        key: &str,
        limits: RateLimits,
        now: Timestamp,
    ) -> Result<RateVerdict, RateLimitError> {
        for attempt in 0 .. 2 {
            {
                let mut shard =
                    self.shards.for_key(key).lock().map_err(|_| RateLimitError::Poisoned)?;
                if let Some(counter) = shard.get_mut(key) {
                    return Ok(charge(counter, limits, now));
                }
                let mut counter = RateCounter::new(now);
                let verdict = charge(&mut counter, limits, now);
                if matches!(verdict, RateVerdict::Denied { .. }) {
                    return Ok(verdict);
                }
                if self.shards.reserve() {
                    shard.insert(key.to_string(), counter);
                    return Ok(verdict);
                }
            }
            if attempt == 0 {
                self.sweep(now)?;
            }
        }
        Err(RateLimitError::Capacity(self.shards.capacity()))
    }

    /// Returns the budget snapshot for `key` without charging it.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Poisoned`] when the shard lock is poisoned.
    pub fn usage(
        &self,
        key: &str,
        limits: RateLimits,
        now: Timestamp,
    ) -> Result<RateUsage, RateLimitError> {
        let shard = self.shards.for_key(key).lock().map_err(|_| RateLimitError::Poisoned)?;
        let mut counter = shard.get(key).copied().unwrap_or_else(|| RateCounter::new(now));
        let now = counter.roll(now);
        Ok(counter.usage(limits, now))
    }

    /// Returns the raw counter for `key` after rolling it to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Poisoned`] when the shard lock is poisoned.
    pub fn counter(&self, key: &str, now: Timestamp) -> Result<Option<RateCounter>, RateLimitError> {
        let shard = self.shards.for_key(key).lock().map_err(|_| RateLimitError::Poisoned)?;
        Ok(shard.get(key).copied().map(|mut counter| {
            counter.roll(now);
            counter
        }))
    }

    /// Discards counters whose windows are both stale.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Poisoned`] when a shard lock is poisoned.
    pub fn sweep(&self, now: Timestamp) -> Result<usize, RateLimitError> {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock().map_err(|_| RateLimitError::Poisoned)?;
            let before = shard.len();
            shard.retain(|_, counter| !counter.is_idle(now));
            removed += before - shard.len();
        }
        self.shards.release(removed);
        Ok(removed)
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Returns true when no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rolls `counter` to `now` and charges it when both windows allow.
fn charge(counter: &mut RateCounter, limits: RateLimits, now: Timestamp) -> RateVerdict {
    let now = counter.roll(now);
    if let Some(window) = counter.exceeded(limits) {
        return RateVerdict::Denied {
            window,
            retry_after: now.until(window.end_of(now)),
            usage: counter.usage(limits, now),
        };
    }
    counter.minute_count += 1;
    counter.day_count += 1;
    RateVerdict::Allowed(counter.usage(limits, now))
}

/// Builds one window's budget snapshot.
fn window_usage(limit: u32, used: u32, window: FixedWindow, now: Timestamp) -> WindowUsage {
    WindowUsage {
        limit,
        used,
        remaining: limit.saturating_sub(used),
        resets_at: window.end_of(now),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
