// crates/qrgate-core/src/runtime/rate_limiter/tests.rs
// ============================================================================
// Module: Rate Limiter Tests
// Description: Unit and property tests for fixed-window quota accounting.
// Purpose: Validate all-or-nothing charging and window rollover.
// Dependencies: qrgate-core, proptest
// ============================================================================

//! ## Overview
//! Covers minute/day exhaustion, rollover at the first instant of a window,
//! retry-after computation, idle sweeps, and randomized charge sequences.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use proptest::prelude::*;

use super::RateLimitError;
use super::RateLimiter;
use super::RateVerdict;
use crate::core::FixedWindow;
use crate::core::RateLimits;
use crate::core::Timestamp;
use crate::core::time::DAY_MS;
use crate::core::time::MINUTE_MS;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const FREE: RateLimits = RateLimits {
    per_minute: 5,
    per_day: 10,
};

fn at(ms: i64) -> Timestamp {
    Timestamp::from_unix_millis(ms)
}

fn is_allowed(verdict: RateVerdict) -> bool {
    matches!(verdict, RateVerdict::Allowed(_))
}

// ============================================================================
// SECTION: Window Tests
// ============================================================================

#[test]
fn minute_limit_denies_with_retry_to_boundary() {
    let limiter = RateLimiter::new(16);
    let start = DAY_MS * 100 + 12_000;
    for offset in 0 .. 5 {
        let verdict = limiter.check_and_increment("k1", FREE, at(start + offset)).unwrap();
        assert!(is_allowed(verdict));
    }

    let verdict = limiter.check_and_increment("k1", FREE, at(start + 5)).unwrap();
    let RateVerdict::Denied {
        window,
        retry_after,
        usage,
    } = verdict
    else {
        panic!("expected minute denial");
    };
    assert_eq!(window, FixedWindow::Minute);
    assert_eq!(retry_after, Duration::from_millis(48_000 - 5));
    assert_eq!(usage.minute.remaining, 0);
    assert_eq!(usage.day.used, 5);
}

#[test]
fn denial_leaves_both_counters_unchanged() {
    let limiter = RateLimiter::new(16);
    for _ in 0 .. 5 {
        limiter.check_and_increment("k1", FREE, at(1_000)).unwrap();
    }
    let before = limiter.counter("k1", at(1_000)).unwrap().unwrap();
    limiter.check_and_increment("k1", FREE, at(1_000)).unwrap();
    let after = limiter.counter("k1", at(1_000)).unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(after.minute_count, 5);
    assert_eq!(after.day_count, 5);
}

#[test]
fn first_instant_of_new_minute_resets_minute_only() {
    let limiter = RateLimiter::new(16);
    for _ in 0 .. 5 {
        limiter.check_and_increment("k1", FREE, at(MINUTE_MS - 1)).unwrap();
    }
    assert!(!is_allowed(limiter.check_and_increment("k1", FREE, at(MINUTE_MS - 1)).unwrap()));

    let verdict = limiter.check_and_increment("k1", FREE, at(MINUTE_MS)).unwrap();
    let RateVerdict::Allowed(usage) = verdict else {
        panic!("expected allow after rollover");
    };
    assert_eq!(usage.minute.used, 1);
    assert_eq!(usage.day.used, 6);
}

#[test]
fn day_limit_is_reported_when_both_are_exhausted() {
    let limits = RateLimits {
        per_minute: 2,
        per_day: 2,
    };
    let limiter = RateLimiter::new(16);
    limiter.check_and_increment("k", limits, at(0)).unwrap();
    limiter.check_and_increment("k", limits, at(0)).unwrap();

    let RateVerdict::Denied {
        window,
        retry_after,
        ..
    } = limiter.check_and_increment("k", limits, at(0)).unwrap()
    else {
        panic!("expected denial");
    };
    assert_eq!(window, FixedWindow::Day);
    assert_eq!(retry_after, Duration::from_millis(u64::try_from(DAY_MS).unwrap()));
}

#[test]
fn day_budget_survives_minute_rollovers() {
    let limiter = RateLimiter::new(16);
    for minute in 0 .. 2 {
        for _ in 0 .. 5 {
            let now = at(minute * MINUTE_MS);
            assert!(is_allowed(limiter.check_and_increment("k1", FREE, now).unwrap()));
        }
    }
    let RateVerdict::Denied {
        window, ..
    } = limiter.check_and_increment("k1", FREE, at(2 * MINUTE_MS)).unwrap()
    else {
        panic!("expected daily denial");
    };
    assert_eq!(window, FixedWindow::Day);
    assert!(is_allowed(limiter.check_and_increment("k1", FREE, at(DAY_MS)).unwrap()));
}

#[test]
fn zero_limits_deny_without_tracking_the_key() {
    let limiter = RateLimiter::new(16);
    let limits = RateLimits {
        per_minute: 0,
        per_day: 0,
    };
    assert!(!is_allowed(limiter.check_and_increment("k", limits, at(0)).unwrap()));
    assert!(limiter.is_empty());
}

#[test]
fn usage_reports_budget_without_charging() {
    let limiter = RateLimiter::new(16);
    limiter.check_and_increment("k1", FREE, at(0)).unwrap();
    let usage = limiter.usage("k1", FREE, at(1)).unwrap();
    assert_eq!(usage.minute.remaining, 4);
    assert_eq!(usage.day.remaining, 9);
    assert_eq!(usage.minute.resets_at, at(MINUTE_MS));
    assert_eq!(limiter.usage("k1", FREE, at(2)).unwrap(), usage);
}

#[test]
fn late_instant_behind_minute_boundary_does_not_reset_current_window() {
    let limits = RateLimits {
        per_minute: 1,
        per_day: 100,
    };
    let limiter = RateLimiter::new(16);
    let boundary = DAY_MS * 3 + MINUTE_MS * 7;

    assert!(is_allowed(limiter.check_and_increment("k", limits, at(boundary)).unwrap()));
    let late = limiter.check_and_increment("k", limits, at(boundary - 1)).unwrap();
    let RateVerdict::Denied {
        window,
        retry_after,
        ..
    } = late
    else {
        panic!("late instant must charge the current window");
    };
    assert_eq!(window, FixedWindow::Minute);
    assert_eq!(retry_after, Duration::from_millis(u64::try_from(MINUTE_MS).unwrap()));
    assert!(!is_allowed(limiter.check_and_increment("k", limits, at(boundary)).unwrap()));

    let counter = limiter.counter("k", at(boundary)).unwrap().unwrap();
    assert_eq!(counter.minute_start, at(boundary));
    assert_eq!(counter.minute_count, 1);
    assert_eq!(counter.day_count, 1);
}

#[test]
fn late_instant_behind_day_boundary_does_not_reset_day_budget() {
    let limits = RateLimits {
        per_minute: 100,
        per_day: 2,
    };
    let limiter = RateLimiter::new(16);
    let new_day = DAY_MS * 9;

    let mut admitted = 0;
    for now in [new_day, new_day - 1, new_day, new_day - 1, new_day + 1] {
        if is_allowed(limiter.check_and_increment("k", limits, at(now)).unwrap()) {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 2);

    let counter = limiter.counter("k", at(new_day + 1)).unwrap().unwrap();
    assert_eq!(counter.day_start, at(new_day));
    assert_eq!(counter.day_count, 2);
}

#[test]
fn usage_with_late_instant_reports_current_window() {
    let limiter = RateLimiter::new(16);
    let boundary = MINUTE_MS * 4;
    limiter.check_and_increment("k1", FREE, at(boundary)).unwrap();
    let usage = limiter.usage("k1", FREE, at(boundary - 10)).unwrap();
    assert_eq!(usage.minute.used, 1);
    assert_eq!(usage.minute.resets_at, at(boundary + MINUTE_MS));
}

// ============================================================================
// SECTION: Capacity Tests
// ============================================================================

#[test]
fn sweep_discards_idle_counters() {
    let limiter = RateLimiter::new(16);
    limiter.check_and_increment("a", FREE, at(0)).unwrap();
    limiter.check_and_increment("b", FREE, at(DAY_MS + 5)).unwrap();

    assert_eq!(limiter.sweep(at(DAY_MS + 10)).unwrap(), 1);
    assert_eq!(limiter.len(), 1);
    assert!(limiter.counter("a", at(DAY_MS + 10)).unwrap().is_none());
}

#[test]
fn capacity_is_enforced_after_sweeping() {
    let limiter = RateLimiter::new(1);
    limiter.check_and_increment("a", FREE, at(0)).unwrap();
    let err = limiter.check_and_increment("b", FREE, at(1)).unwrap_err();
    assert_eq!(err, RateLimitError::Capacity(1));

    assert!(is_allowed(limiter.check_and_increment("b", FREE, at(DAY_MS)).unwrap()));
    assert_eq!(limiter.len(), 1);
}

// ============================================================================
// SECTION: Property Tests
// ============================================================================

proptest! {
    #[test]
    fn counters_never_exceed_limits(
        per_minute in 1_u32 .. 20,
        per_day in 1_u32 .. 60,
        steps in proptest::collection::vec(0_i64 .. 30_000, 1 .. 200),
    ) {
        let limits = RateLimits { per_minute, per_day };
        let limiter = RateLimiter::new(4);
        let mut now = 0_i64;
        for step in steps {
            now += step;
            let before = limiter.counter("k", at(now)).unwrap();
            let verdict = limiter.check_and_increment("k", limits, at(now)).unwrap();
            let after = limiter.counter("k", at(now)).unwrap();
            if let Some(counter) = after {
                prop_assert!(counter.minute_count <= per_minute);
                prop_assert!(counter.day_count <= per_day);
            }
            if !is_allowed(verdict) {
                prop_assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn jittered_instants_never_admit_past_a_window_limit(
        per_minute in 1_u32 .. 10,
        steps in proptest::collection::vec((0_i64 .. 20_000, 0_i64 .. 5_000), 1 .. 200),
    ) {
        let limits = RateLimits { per_minute, per_day: 10_000 };
        let limiter = RateLimiter::new(4);
        let mut admitted = std::collections::BTreeMap::<i64, u32>::new();
        let mut now = 10_000_i64;
        for (step, lag) in steps {
            now += step;
            let verdict = limiter.check_and_increment("k", limits, at(now - lag)).unwrap();
            if is_allowed(verdict) {
                let counter = limiter.counter("k", at(now - lag)).unwrap().unwrap();
                *admitted.entry(counter.minute_start.as_unix_millis()).or_default() += 1;
            }
        }
        for count in admitted.values() {
            prop_assert!(*count <= per_minute);
        }
    }
}
