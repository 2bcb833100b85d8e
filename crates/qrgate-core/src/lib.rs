// crates/qrgate-core/src/lib.rs
// ============================================================================
// Module: QR Gate Core Library
// Description: Public API surface for the QR Gate access core.
// Purpose: Expose core types, interfaces, runtime components, and audit sinks.
// Dependencies: crate::{audit, core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! QR Gate decides whether a code-generation request may run: it
//! authenticates the API key, checks the subscription tier's entitlements,
//! charges per-key minute and day budgets, and records the outcome for usage
//! accounting. The generation pipeline, HTTP routing, and key backend are
//! external and reached only through [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use audit::AuditSink;
pub use audit::DecisionAuditEvent;
pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::SecurityAuditEvent;
pub use audit::SessionSource;
pub use audit::StderrAuditSink;
pub use interfaces::BackendError;
pub use interfaces::BackendVerdict;
pub use interfaces::KeyBackend;
pub use interfaces::LedgerError;
pub use interfaces::UsageLedger;
pub use runtime::AccessDecisionEngine;
pub use runtime::ApiKeyValidator;
pub use runtime::BufferedUsageLedger;
pub use runtime::EngineComponents;
pub use runtime::EngineConfig;
pub use runtime::FailurePolicy;
pub use runtime::InMemoryUsageLedger;
pub use runtime::RateLimiter;
pub use runtime::SessionCache;
pub use runtime::ValidatorConfig;
pub use runtime::WebhookError;
pub use runtime::WebhookGateway;
pub use runtime::WebhookOutcome;
