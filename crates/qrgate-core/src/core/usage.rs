// crates/qrgate-core/src/core/usage.rs
// ============================================================================
// Module: QR Gate Usage Records
// Description: Usage ledger entries, committed records, and per-user stats.
// Purpose: Provide the immutable billing/export record format.
// Dependencies: crate::core::time, serde
// ============================================================================

//! ## Overview
//! A [`UsageEntry`] is what the decision path submits; the ledger assigns an
//! id on commit and turns it into an immutable [`UsageRecord`]. Records hold
//! an API key hash, never the raw key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Entries + Records
// ============================================================================

/// Usage outcome submitted for recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    /// When the decision was made.
    pub timestamp: Timestamp,
    /// Resolved user, absent when the key never authenticated.
    pub user_id: Option<String>,
    /// SHA-256 hex of the presented API key.
    pub api_key_hash: String,
    /// Requested style.
    pub style: String,
    /// Whether the request was allowed.
    pub success: bool,
    /// Free-form metadata (reason code, tier, sizes).
    pub metadata: BTreeMap<String, String>,
}

/// Committed, immutable usage record.
///
/// # Invariants
/// - `id` is unique and increases with commit order within one ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Ledger-assigned identifier.
    pub id: u64,
    /// When the decision was made.
    pub timestamp: Timestamp,
    /// Resolved user, absent when the key never authenticated.
    pub user_id: Option<String>,
    /// SHA-256 hex of the presented API key.
    pub api_key_hash: String,
    /// Requested style.
    pub style: String,
    /// Whether the request was allowed.
    pub success: bool,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
}

impl UsageRecord {
    /// Commits an entry under `id`.
    #[must_use]
    pub fn from_entry(id: u64, entry: UsageEntry) -> Self {
        Self {
            id,
            timestamp: entry.timestamp,
            user_id: entry.user_id,
            api_key_hash: entry.api_key_hash,
            style: entry.style,
            success: entry.success,
            metadata: entry.metadata,
        }
    }
}

// ============================================================================
// SECTION: Stats
// ============================================================================

/// Aggregated usage for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    /// Total recorded requests.
    pub total_requests: u64,
    /// Allowed requests.
    pub successful: u64,
    /// Request count per style.
    pub by_style: BTreeMap<String, u64>,
}

impl UsageStats {
    /// Folds one record into the stats.
    pub fn add(&mut self, record: &UsageRecord) {
        self.total_requests += 1;
        if record.success {
            self.successful += 1;
        }
        *self.by_style.entry(record.style.clone()).or_insert(0) += 1;
    }
}
