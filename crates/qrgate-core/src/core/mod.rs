// crates/qrgate-core/src/core/mod.rs
// ============================================================================
// Module: QR Gate Core Types
// Description: Tier policy, sessions, decisions, usage, and time types.
// Purpose: Provide stable, serializable types shared by every gate component.
// Dependencies: serde, sha2, subtle
// ============================================================================

//! ## Overview
//! Core types define the decision contract and the records each component
//! owns. They carry no synchronization; the runtime components own all
//! shared state.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod decision;
pub mod events;
pub mod hashing;
pub mod session;
pub mod tier;
pub mod time;
pub mod usage;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use decision::AccessRequest;
pub use decision::Decision;
pub use decision::DenyReason;
pub use decision::ForbiddenReason;
pub use decision::RateUsage;
pub use decision::WindowUsage;
pub use events::WebhookEvent;
pub use session::ApiKeySession;
pub use session::Identity;
pub use tier::PolicyError;
pub use tier::RateLimits;
pub use tier::Tier;
pub use tier::TierEntitlements;
pub use tier::TierPolicy;
pub use tier::TierSummary;
pub use time::Clock;
pub use time::FixedWindow;
pub use time::ManualClock;
pub use time::SystemClock;
pub use time::Timestamp;
pub use usage::UsageEntry;
pub use usage::UsageRecord;
pub use usage::UsageStats;
