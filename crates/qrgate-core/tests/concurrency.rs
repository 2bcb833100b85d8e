// crates/qrgate-core/tests/concurrency.rs
// ============================================================================
// Module: Concurrency Tests
// Description: Multi-threaded decision, coalescing, and webhook atomicity tests.
// Purpose: Validate per-key linearizability under simultaneous requests.
// Dependencies: qrgate-core, tokio
// ============================================================================

//! ## Overview
//! Runs many decisions at once on a multi-thread runtime and checks that
//! outcomes match some serial order: exact allow counts, one backend call
//! per key, and tier snapshots that are never half applied.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions are permitted."
)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use common::WEBHOOK_SECRET;
use common::start;
use qrgate_core::AccessRequest;
use qrgate_core::DenyReason;
use qrgate_core::FixedWindow;
use qrgate_core::RateLimiter;
use qrgate_core::Tier;
use qrgate_core::core::RateLimits;
use qrgate_core::runtime::RateVerdict;

// ============================================================================
// SECTION: Linearizability
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn simultaneous_requests_allow_exactly_the_remaining_budget() {
    let harness = Arc::new(Harness::fail_closed());
    harness.backend.register("pro-key", "user-p", Tier::Pro);
    harness.backend.set_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0 .. 64 {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move {
            harness.engine.decide(&AccessRequest::single("pro-key", "logo", 1_000)).await
        }));
    }
    let mut allowed = 0;
    let mut limited = 0;
    for handle in handles {
        let decision = handle.await.unwrap();
        if decision.allow {
            allowed += 1;
        } else {
            assert_eq!(decision.reason, Some(DenyReason::RateLimited(FixedWindow::Minute)));
            limited += 1;
        }
    }
    assert_eq!(allowed, 30);
    assert_eq!(limited, 34);
    assert_eq!(harness.backend.calls(), 1);

    let counter = harness.engine.limiter().counter("pro-key", start()).unwrap().unwrap();
    assert_eq!(counter.minute_count, 30);
    assert_eq!(counter.day_count, 30);
}

#[test]
fn limiter_threads_never_overshoot() {
    let limiter = Arc::new(RateLimiter::new(64));
    let limits = RateLimits {
        per_minute: 37,
        per_day: 1_000,
    };
    let now = start();
    let threads: Vec<_> = (0 .. 8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            std::thread::spawn(move || {
                (0 .. 20)
                    .filter(|_| {
                        matches!(
                            limiter.check_and_increment("hot", limits, now).unwrap(),
                            RateVerdict::Allowed(_)
                        )
                    })
                    .count()
            })
        })
        .collect();
    let allowed: usize = threads.into_iter().map(|thread| thread.join().unwrap()).sum();
    assert_eq!(allowed, 37);
    assert_eq!(limiter.counter("hot", now).unwrap().unwrap().minute_count, 37);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keys_do_not_share_budgets() {
    let harness = Arc::new(Harness::fail_closed());
    for index in 0 .. 8 {
        harness.backend.register(&format!("key-{index}"), &format!("user-{index}"), Tier::Free);
    }
    harness.backend.set_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for index in 0 .. 8 {
        for _ in 0 .. 7 {
            let harness = Arc::clone(&harness);
            let key = format!("key-{index}");
            handles.push(tokio::spawn(async move {
                (key.clone(), harness.engine.decide(&AccessRequest::single(key, "basic", 100)).await)
            }));
        }
    }
    let mut allowed = std::collections::BTreeMap::<String, u32>::new();
    for handle in handles {
        let (key, decision) = handle.await.unwrap();
        if decision.allow {
            *allowed.entry(key).or_default() += 1;
        }
    }
    assert_eq!(allowed.len(), 8);
    assert!(allowed.values().all(|count| *count == 5));
    assert_eq!(harness.backend.calls(), 8);
}

// ============================================================================
// SECTION: Webhook Atomicity
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tier_updates_are_never_observed_half_applied() {
    let harness = Arc::new(Harness::fail_closed());
    harness.backend.register("k", "user-k", Tier::Free);
    assert!(harness.engine.decide(&AccessRequest::single("k", "basic", 100)).await.allow);
    let validated_at = start();

    let update_at = start().saturating_add(Duration::from_secs(10));
    harness.clock.set(update_at);

    let readers: Vec<_> = (0 .. 4)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::task::spawn_blocking(move || {
                for _ in 0 .. 2_000 {
                    let session = harness.cache.get("k", update_at).unwrap().unwrap();
                    let consistent = (session.tier == Tier::Free
                        && session.tier_assigned_at == validated_at)
                        || (session.tier == Tier::Business && session.tier_assigned_at == update_at);
                    assert!(consistent, "half-applied tier update observed");
                }
            })
        })
        .collect();
    let writer = {
        let harness = Arc::clone(&harness);
        tokio::task::spawn_blocking(move || {
            harness.webhook.update_tier(Some(WEBHOOK_SECRET), "k", Tier::Business).unwrap()
        })
    };

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    let decision = harness.engine.decide(&AccessRequest::single("k", "artistic", 100)).await;
    assert!(decision.allow);
    assert_eq!(decision.tier, Some(Tier::Business));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn decisions_racing_a_downgrade_see_one_tier_or_the_other() {
    let harness = Arc::new(Harness::fail_closed());
    harness.backend.register("k", "user-k", Tier::Business);
    assert!(harness.engine.decide(&AccessRequest::single("k", "basic", 100)).await.allow);

    let mut handles = Vec::new();
    for index in 0 .. 40 {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move {
            if index == 20 {
                harness.webhook.update_tier(Some(WEBHOOK_SECRET), "k", Tier::Free).unwrap();
            }
            harness.engine.decide(&AccessRequest::single("k", "logo", 100)).await
        }));
    }
    for handle in handles {
        let decision = handle.await.unwrap();
        match decision.tier {
            Some(Tier::Business) => assert!(decision.allow),
            Some(Tier::Free) => assert_eq!(
                decision.reason,
                Some(DenyReason::TierForbidden(qrgate_core::ForbiddenReason::StyleNotAllowed))
            ),
            other => panic!("unexpected tier {other:?}"),
        }
    }
}

// ============================================================================
// SECTION: Revocation Races
// ============================================================================

#[tokio::test]
async fn invalidation_during_validation_is_not_undone_by_the_result() {
    let harness = Harness::fail_closed();
    harness.backend.register("kx", "user-x", Tier::Pro);
    harness.backend.set_delay(Duration::from_millis(200));

    let request = AccessRequest::single("kx", "basic", 100);
    let (first, webhook) = tokio::join!(
        harness.engine.decide(&request),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            harness.backend.revoke("kx");
            harness.webhook.invalidate_key(Some(WEBHOOK_SECRET), "kx").unwrap()
        },
    );
    assert_eq!(webhook, qrgate_core::WebhookOutcome::NotCached);
    assert!(first.allow);
    assert!(harness.cache.is_empty());

    let after = harness.engine.decide(&AccessRequest::single("kx", "basic", 100)).await;
    assert_eq!(after.reason, Some(DenyReason::Unauthorized));
    assert_eq!(harness.backend.calls(), 2);
    assert!(harness.cache.is_empty());
}

#[tokio::test]
async fn decisions_after_invalidation_do_not_join_an_older_validation() {
    let harness = Harness::fail_closed();
    harness.backend.register("ky", "user-y", Tier::Pro);
    harness.backend.set_delay(Duration::from_millis(200));

    let request = AccessRequest::single("ky", "basic", 100);
    let (first, second) = tokio::join!(
        harness.engine.decide(&request),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            harness.backend.revoke("ky");
            harness.webhook.invalidate_key(Some(WEBHOOK_SECRET), "ky").unwrap();
            harness.engine.decide(&AccessRequest::single("ky", "basic", 100)).await
        },
    );
    assert!(first.allow);
    assert_eq!(second.reason, Some(DenyReason::Unauthorized));
    assert_eq!(harness.backend.calls(), 2);
    assert!(harness.cache.is_empty());
}

#[tokio::test]
async fn tier_push_during_validation_is_not_overwritten_by_the_result() {
    let harness = Harness::fail_closed();
    harness.backend.register("kz", "user-z", Tier::Free);
    harness.backend.set_delay(Duration::from_millis(200));

    let request = AccessRequest::single("kz", "basic", 100);
    let (first, _) = tokio::join!(
        harness.engine.decide(&request),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            harness.backend.register("kz", "user-z", Tier::Business);
            harness.webhook.update_tier(Some(WEBHOOK_SECRET), "kz", Tier::Business).unwrap()
        },
    );
    assert_eq!(first.tier, Some(Tier::Free));
    assert!(harness.cache.is_empty());

    harness.backend.set_delay(Duration::ZERO);
    let after = harness.engine.decide(&AccessRequest::single("kz", "artistic", 100)).await;
    assert!(after.allow);
    assert_eq!(after.tier, Some(Tier::Business));
}
