// crates/qrgate-core/src/runtime/ledger.rs
// ============================================================================
// Module: Usage Ledgers
// Description: In-memory usage ledger and a non-blocking buffered wrapper.
// Purpose: Record decision outcomes without delaying or failing decisions.
// Dependencies: crate::{audit, core, interfaces}, tokio
// ============================================================================

//! ## Overview
//! [`InMemoryUsageLedger`] keeps committed records in a mutex-guarded vector
//! and assigns ids on commit. [`BufferedUsageLedger`] wraps any ledger with a
//! bounded channel drained by a blocking flusher task, so `record` never
//! waits on storage. A full buffer drops the entry and emits an audit event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::audit::AuditSink;
use crate::audit::LedgerAuditEvent;
use crate::core::Clock;
use crate::core::Timestamp;
use crate::core::UsageEntry;
use crate::core::UsageRecord;
use crate::core::UsageStats;
use crate::interfaces::LedgerError;
use crate::interfaces::UsageLedger;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default number of queued entries before drops begin.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4_096;

// ============================================================================
// SECTION: In-Memory Ledger
// ============================================================================

/// Committed state of the in-memory ledger.
#[derive(Default)]
struct MemoryLedgerState {
    /// Last assigned id.
    last_id: u64,
    /// Records in commit order.
    records: Vec<UsageRecord>,
}

/// Process-local usage ledger.
#[derive(Default)]
pub struct InMemoryUsageLedger {
    /// Committed records.
    state: Mutex<MemoryLedgerState>,
}

impl InMemoryUsageLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the ledger state.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryLedgerState>, LedgerError> {
        self.state.lock().map_err(|_| LedgerError::Storage("usage ledger lock poisoned".to_string()))
    }
}

impl UsageLedger for InMemoryUsageLedger {
    fn record(&self, entry: UsageEntry) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        state.last_id += 1;
        let id = state.last_id;
        state.records.push(UsageRecord::from_entry(id, entry));
        Ok(())
    }

    fn get_since(&self, since: Timestamp) -> Result<Vec<UsageRecord>, LedgerError> {
        let state = self.lock()?;
        let mut records: Vec<UsageRecord> =
            state.records.iter().filter(|record| record.timestamp > since).cloned().collect();
        records.sort_by_key(|record| (record.timestamp, record.id));
        Ok(records)
    }

    fn cleanup(&self, older_than: Timestamp) -> Result<u64, LedgerError> {
        let mut state = self.lock()?;
        let before = state.records.len();
        state.records.retain(|record| record.timestamp > older_than);
        let removed = before - state.records.len();
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    fn user_stats(&self, user_id: &str) -> Result<UsageStats, LedgerError> {
        let state = self.lock()?;
        let mut stats = UsageStats::default();
        state
            .records
            .iter()
            .filter(|record| record.user_id.as_deref() == Some(user_id))
            .for_each(|record| stats.add(record));
        Ok(stats)
    }
}

// ============================================================================
// SECTION: Buffered Ledger
// ============================================================================

/// Commands handled by the flusher task.
enum LedgerCommand {
    /// Commit one entry.
    Append(UsageEntry),
    /// Acknowledge once everything queued before it is committed.
    Flush(oneshot::Sender<()>),
}

/// Ledger wrapper whose `record` never blocks the caller.
///
/// # Invariants
/// - Entries are committed to the inner ledger in submission order.
/// - Reads go straight to the inner ledger and see committed records only.
pub struct BufferedUsageLedger {
    /// Ledger receiving committed entries.
    inner: Arc<dyn UsageLedger>,
    /// Queue feeding the flusher.
    sender: mpsc::Sender<LedgerCommand>,
    /// Flusher task handle.
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Audit sink for drops and commit failures.
    audit: Arc<dyn AuditSink>,
    /// Time source for audit timestamps.
    clock: Arc<dyn Clock>,
}

impl BufferedUsageLedger {
    /// Spawns the flusher on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Closed`] when called outside a tokio runtime.
    pub fn spawn(
        inner: Arc<dyn UsageLedger>,
        capacity: usize,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| LedgerError::Closed)?;
        let (sender, mut receiver) = mpsc::channel(capacity.max(1));
        let worker_inner = Arc::clone(&inner);
        let worker_audit = Arc::clone(&audit);
        let worker_clock = Arc::clone(&clock);
        let worker = handle.spawn_blocking(move || {
            while let Some(command) = receiver.blocking_recv() {
                match command {
                    LedgerCommand::Append(entry) => {
                        if let Err(err) = worker_inner.record(entry) {
                            worker_audit.record_ledger(&LedgerAuditEvent::new(
                                worker_clock.now(),
                                "append_failed",
                                err.to_string(),
                            ));
                        }
                    }
                    LedgerCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        Ok(Self {
            inner,
            sender,
            worker: Mutex::new(Some(worker)),
            audit,
            clock,
        })
    }

    /// Waits until every entry queued before this call is committed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Closed`] when the flusher has stopped.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        let (ack, done) = oneshot::channel();
        self.sender.send(LedgerCommand::Flush(ack)).await.map_err(|_| LedgerError::Closed)?;
        done.await.map_err(|_| LedgerError::Closed)
    }

    /// Flushes pending entries and returns the flusher handle for joining.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Closed`] when the flusher has already stopped.
    pub async fn close(&self) -> Result<Option<JoinHandle<()>>, LedgerError> {
        self.flush().await?;
        let handle = self
            .worker
            .lock()
            .map_err(|_| LedgerError::Storage("usage ledger worker lock poisoned".to_string()))?
            .take();
        Ok(handle)
    }
}

impl UsageLedger for BufferedUsageLedger {
    fn record(&self, entry: UsageEntry) -> Result<(), LedgerError> {
        match self.sender.try_send(LedgerCommand::Append(entry)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.audit.record_ledger(&LedgerAuditEvent::new(
                    self.clock.now(),
                    "dropped",
                    LedgerError::Overloaded.to_string(),
                ));
                Err(LedgerError::Overloaded)
            }
            Err(TrySendError::Closed(_)) => Err(LedgerError::Closed),
        }
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
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
