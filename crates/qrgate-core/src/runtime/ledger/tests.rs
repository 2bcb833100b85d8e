// crates/qrgate-core/src/runtime/ledger/tests.rs
// ============================================================================
// Module: Usage Ledger Tests
// Description: Unit tests for in-memory and buffered usage ledgers.
// Purpose: Validate ordering, retention, stats, and overflow handling.
// Dependencies: qrgate-core, tokio
// ============================================================================

//! ## Overview
//! Covers strict `get_since` semantics, cleanup boundaries, user stats, and
//! that a full buffer drops entries without blocking.

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

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;

use super::BufferedUsageLedger;
use super::InMemoryUsageLedger;
use crate::audit::MemoryAuditSink;
use crate::core::ManualClock;
use crate::core::Timestamp;
use crate::core::UsageEntry;
use crate::core::UsageRecord;
use crate::core::UsageStats;
use crate::interfaces::LedgerError;
use crate::interfaces::UsageLedger;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn entry(ms: i64, user: Option<&str>, style: &str, success: bool) -> UsageEntry {
    UsageEntry {
        timestamp: Timestamp::from_unix_millis(ms),
        user_id: user.map(str::to_string),
        api_key_hash: "ab".repeat(32),
        style: style.to_string(),
        success,
        metadata: BTreeMap::from([("reason".to_string(), "allowed".to_string())]),
    }
}

/// Ledger that blocks commits until released.
struct GatedLedger {
    inner: InMemoryUsageLedger,
    open: Mutex<bool>,
    signal: Condvar,
}

impl GatedLedger {
    fn new() -> Self {
        Self {
            inner: InMemoryUsageLedger::new(),
            open: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }
}

impl UsageLedger for GatedLedger {
    fn record(&self, entry: UsageEntry) -> Result<(), LedgerError> {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
        drop(open);
        self.inner.record(entry)
    }

    fn get_since(&self, since: Timestamp) -> Result<Vec<UsageRecord>, LedgerError> {
        self.inner.get_since(since)
    }

    fn cleanup(&self, older_than: Timestamp) -> Result<u64, LedgerError> {
        self.inner.cleanup(older_than)
    }

    fn user_stats(&self, user_id: &str) -> Result<UsageStats, LedgerError> {
        self.inner.user_stats(user_id)
    }
}

// ============================================================================
// SECTION: In-Memory Tests
// ============================================================================

#[test]
fn get_since_is_strict_and_ordered() {
    let ledger = InMemoryUsageLedger::new();
    ledger.record(entry(300, Some("u"), "basic", true)).unwrap();
    ledger.record(entry(100, Some("u"), "basic", true)).unwrap();
    ledger.record(entry(200, Some("u"), "logo", false)).unwrap();
    ledger.record(entry(200, Some("u"), "text", true)).unwrap();

    let records = ledger.get_since(Timestamp::from_unix_millis(100)).unwrap();
    let order: Vec<(i64, u64)> =
        records.iter().map(|record| (record.timestamp.as_unix_millis(), record.id)).collect();
    assert_eq!(order, vec![(200, 3), (200, 4), (300, 1)]);
}

#[test]
fn cleanup_removes_records_at_or_before_cutoff() {
    let ledger = InMemoryUsageLedger::new();
    for ms in [100, 200, 300] {
        ledger.record(entry(ms, None, "basic", false)).unwrap();
    }
    assert_eq!(ledger.cleanup(Timestamp::from_unix_millis(200)).unwrap(), 2);
    let remaining = ledger.get_since(Timestamp::from_unix_millis(0)).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].timestamp, Timestamp::from_unix_millis(300));
}

#[test]
fn ids_keep_increasing_after_cleanup() {
    let ledger = InMemoryUsageLedger::new();
    ledger.record(entry(1, None, "basic", true)).unwrap();
    ledger.cleanup(Timestamp::from_unix_millis(10)).unwrap();
    ledger.record(entry(20, None, "basic", true)).unwrap();
    let records = ledger.get_since(Timestamp::from_unix_millis(0)).unwrap();
    assert_eq!(records[0].id, 2);
}

#[test]
fn user_stats_count_by_style() {
    let ledger = InMemoryUsageLedger::new();
    ledger.record(entry(1, Some("alice"), "basic", true)).unwrap();
    ledger.record(entry(2, Some("alice"), "basic", false)).unwrap();
    ledger.record(entry(3, Some("alice"), "logo", true)).unwrap();
    ledger.record(entry(4, Some("bob"), "logo", true)).unwrap();

    let stats = ledger.user_stats("alice").unwrap();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.by_style.get("basic"), Some(&2));
    assert_eq!(stats.by_style.get("logo"), Some(&1));
}

// ============================================================================
// SECTION: Buffered Tests
// ============================================================================

#[tokio::test]
async fn buffered_ledger_commits_on_flush() {
    let inner = Arc::new(InMemoryUsageLedger::new());
    let ledger = BufferedUsageLedger::spawn(
        inner.clone(),
        16,
        Arc::new(MemoryAuditSink::new()),
        Arc::new(ManualClock::new(Timestamp::from_unix_millis(0))),
    )
    .unwrap();

    for ms in 1 ..= 5 {
        ledger.record(entry(ms, Some("u"), "basic", true)).unwrap();
    }
    ledger.flush().await.unwrap();
    assert_eq!(ledger.get_since(Timestamp::from_unix_millis(0)).unwrap().len(), 5);
    assert_eq!(inner.user_stats("u").unwrap().total_requests, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_buffer_drops_without_blocking() {
    let gated = Arc::new(GatedLedger::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let ledger = BufferedUsageLedger::spawn(
        gated.clone(),
        2,
        audit.clone(),
        Arc::new(ManualClock::new(Timestamp::from_unix_millis(0))),
    )
    .unwrap();

    let mut dropped = 0;
    for ms in 0 .. 10 {
        if ledger.record(entry(ms, None, "basic", true)) == Err(LedgerError::Overloaded) {
            dropped += 1;
        }
    }
    assert!(dropped >= 7);
    assert_eq!(audit.events_of("usage_ledger").len(), dropped);

    gated.release();
    ledger.flush().await.unwrap();
    let committed = ledger.get_since(Timestamp::from_unix_millis(-1)).unwrap().len();
    assert_eq!(committed, 10 - dropped);
}

#[test]
fn spawn_requires_a_runtime() {
    let result = BufferedUsageLedger::spawn(
        Arc::new(InMemoryUsageLedger::new()),
        4,
        Arc::new(MemoryAuditSink::new()),
        Arc::new(ManualClock::new(Timestamp::from_unix_millis(0))),
    );
    assert!(matches!(result, Err(LedgerError::Closed)));
}
