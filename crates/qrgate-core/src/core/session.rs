// crates/qrgate-core/src/core/session.rs
// ============================================================================
// Module: QR Gate Sessions
// Description: Resolved API key identity and cached session records.
// Purpose: Carry validation results and their TTL through the decision path.
// Dependencies: crate::core::{hashing, tier, time}, serde
// ============================================================================

//! ## Overview
//! An [`ApiKeySession`] is the cached outcome of a successful key validation.
//! Freshness is measured from `validated_at`; cache hits never move it, so a
//! session is never valid beyond its TTL without a new validation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::key_fingerprint;
use crate::core::tier::Tier;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Identity
// ============================================================================

/// Identity resolved for an API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend user identifier.
    pub user_id: String,
    /// Subscription tier.
    pub tier: Tier,
    /// Optional account email reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    /// Builds an identity without an email.
    #[must_use]
    pub fn new(user_id: impl Into<String>, tier: Tier) -> Self {
        Self {
            user_id: user_id.into(),
            tier,
            email: None,
        }
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Cached session for a validated API key.
///
/// # Invariants
/// - `key_id` is a fingerprint; the raw key is only the cache lookup key.
/// - `tier` and `tier_assigned_at` always change together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeySession {
    /// Log-safe key fingerprint.
    pub key_id: String,
    /// Backend user identifier.
    pub user_id: String,
    /// Optional account email.
    pub email: Option<String>,
    /// Current tier (may be overridden by webhook).
    pub tier: Tier,
    /// When the current tier was assigned.
    pub tier_assigned_at: Timestamp,
    /// When the key was last validated against the backend.
    pub validated_at: Timestamp,
    /// How long the validation stays fresh.
    pub ttl: Duration,
    /// Most recent cache hit.
    pub last_used_at: Timestamp,
}

impl ApiKeySession {
    /// Builds a fresh session from a validation result.
    #[must_use]
    pub fn new(api_key: &str, identity: Identity, validated_at: Timestamp, ttl: Duration) -> Self {
        Self {
            key_id: key_fingerprint(api_key),
            user_id: identity.user_id,
            email: identity.email,
            tier: identity.tier,
            tier_assigned_at: validated_at,
            validated_at,
            ttl,
            last_used_at: validated_at,
        }
    }

    /// Returns the first instant at which the session is stale.
    #[must_use]
    pub fn expires_at(&self) -> Timestamp {
        self.validated_at.saturating_add(self.ttl)
    }

    /// Returns true while the session is inside its TTL.
    #[must_use]
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        now < self.expires_at()
    }

    /// Returns true while the session is inside an extended grace horizon.
    #[must_use]
    pub fn within_grace(&self, now: Timestamp, grace: Duration) -> bool {
        now < self.validated_at.saturating_add(grace)
    }

    /// Returns the identity carried by the session.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            tier: self.tier,
            email: self.email.clone(),
        }
    }
}
