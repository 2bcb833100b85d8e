// crates/qrgate-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Usage Ledger
// Description: Durable UsageLedger backend using SQLite WAL.
// Purpose: Persist usage records across restarts.
// Dependencies: qrgate-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`qrgate_core::UsageLedger`] that
//! stores one row per decision outcome. Reads are ordered by timestamp then
//! commit id. Security posture: storage inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteLedgerConfig;
pub use store::SqliteLedgerError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
pub use store::SqliteUsageLedger;
