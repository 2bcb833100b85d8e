// crates/qrgate-service/src/lib.rs
// ============================================================================
// Module: QR Gate Service Library
// Description: Service assembly for the QR Gate.
// Purpose: Wire config, the HTTP key backend, storage, and audit into a gate.
// Dependencies: qrgate-config, qrgate-core, qrgate-store-sqlite, reqwest, tokio
// ============================================================================

//! ## Overview
//! `qrgate-service` turns a validated [`qrgate_config::QrGateConfig`] into a
//! running [`AccessGate`]: the HTTP key backend, the configured usage store
//! behind a buffered ledger, the audit sink, and a maintenance loop.
//!
//! Security posture: backend responses are untrusted; secrets are never
//! logged.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod backend;
pub mod gate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use backend::HttpKeyBackend;
pub use backend::VALIDATE_KEY_PATH;
pub use gate::AccessGate;
pub use gate::GateBuildError;
pub use gate::MaintenanceError;
pub use gate::MaintenanceReport;
