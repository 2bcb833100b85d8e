// crates/qrgate-core/src/runtime/mod.rs
// ============================================================================
// Module: QR Gate Runtime
// Description: Stateful gate components and the decision engine.
// Purpose: Own all shared state behind per-key synchronization.
// Dependencies: crate::{audit, core, interfaces}, tokio
// ============================================================================

//! ## Overview
//! Runtime components in dependency order: [`SessionCache`],
//! [`ApiKeyValidator`], [`RateLimiter`], usage ledgers, [`WebhookGateway`],
//! and the [`AccessDecisionEngine`] that ties them together.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod engine;
pub mod ledger;
pub mod rate_limiter;
pub mod session_cache;
mod shards;
pub mod validator;
pub mod webhook;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use engine::AccessDecisionEngine;
pub use engine::EngineComponents;
pub use engine::EngineConfig;
pub use engine::FailurePolicy;
pub use engine::check_entitlements;
pub use ledger::BufferedUsageLedger;
pub use ledger::DEFAULT_BUFFER_CAPACITY;
pub use ledger::InMemoryUsageLedger;
pub use rate_limiter::RateCounter;
pub use rate_limiter::RateLimitError;
pub use rate_limiter::RateLimiter;
pub use rate_limiter::RateVerdict;
pub use session_cache::SessionCache;
pub use session_cache::SessionCacheError;
pub use shards::DEFAULT_SHARD_COUNT;
pub use validator::ApiKeyValidator;
pub use validator::ValidationOutcome;
pub use validator::ValidatorConfig;
pub use validator::ValidatorError;
pub use validator::mint_admin_key;
pub use validator::verify_admin_key;
pub use webhook::WebhookError;
pub use webhook::WebhookGateway;
pub use webhook::WebhookOutcome;
