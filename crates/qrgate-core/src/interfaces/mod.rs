// crates/qrgate-core/src/interfaces/mod.rs
// ============================================================================
// Module: QR Gate Interfaces
// Description: Backend validation and usage ledger seams.
// Purpose: Keep network and storage technology out of the decision core.
// Dependencies: crate::core, async-trait, thiserror
// ============================================================================

//! ## Overview
//! The core talks to the outside world through two traits: [`KeyBackend`]
//! (the only operation allowed to block on network I/O) and [`UsageLedger`]
//! (append-only usage storage). Implementations live in downstream crates or
//! in [`crate::runtime`] for in-memory use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use thiserror::Error;

use crate::core::Identity;
use crate::core::Timestamp;
use crate::core::UsageEntry;
use crate::core::UsageRecord;
use crate::core::UsageStats;

// ============================================================================
// SECTION: Key Backend
// ============================================================================

/// Backend answer for a key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendVerdict {
    /// Key is valid and maps to this identity.
    Valid(Identity),
    /// Key is unknown, revoked, or malformed.
    Invalid,
}

/// Backend lookup failures.
///
/// # Invariants
/// - None of these variants mean the key is invalid; they are retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Backend could not be reached or answered unexpectedly.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Backend did not answer within the hard timeout.
    #[error("backend timed out")]
    Timeout,
}

/// Authoritative API key lookup.
#[async_trait]
pub trait KeyBackend: Send + Sync {
    /// Resolves `api_key` against the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the backend cannot give an answer.
    async fn validate(&self, api_key: &str) -> Result<BackendVerdict, BackendError>;
}

// ============================================================================
// SECTION: Usage Ledger
// ============================================================================

/// Usage ledger failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Storage backend failure.
    #[error("usage ledger storage error: {0}")]
    Storage(String),
    /// Write buffer is full; the entry was dropped.
    #[error("usage ledger buffer full")]
    Overloaded,
    /// Ledger has shut down.
    #[error("usage ledger closed")]
    Closed,
}

/// Append-only usage storage.
///
/// # Invariants
/// - Committed records are never modified; only [`UsageLedger::cleanup`] removes them.
/// - [`UsageLedger::get_since`] returns records ordered by `(timestamp, id)`.
pub trait UsageLedger: Send + Sync {
    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the entry cannot be accepted.
    fn record(&self, entry: UsageEntry) -> Result<(), LedgerError>;

    /// Returns committed records with `timestamp > since`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when storage cannot be read.
    fn get_since(&self, since: Timestamp) -> Result<Vec<UsageRecord>, LedgerError>;

    /// Removes records with `timestamp <= older_than`, returning the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when storage cannot be updated.
    fn cleanup(&self, older_than: Timestamp) -> Result<u64, LedgerError>;

    /// Returns aggregate usage for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when storage cannot be read.
    fn user_stats(&self, user_id: &str) -> Result<UsageStats, LedgerError>;
}
