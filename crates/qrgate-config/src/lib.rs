// crates/qrgate-config/src/lib.rs
// ============================================================================
// Module: QR Gate Config Library
// Description: Canonical config model, validation, and examples.
// Purpose: Single source of truth for qrgate.toml semantics.
// Dependencies: qrgate-core, serde, toml
// ============================================================================

//! ## Overview
//! `qrgate-config` defines the configuration model for the QR Gate. It
//! provides strict, fail-closed validation and converts validated settings
//! into the core runtime types.
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
