// crates/qrgate-core/src/core/events.rs
// ============================================================================
// Module: QR Gate Webhook Events
// Description: Backend-pushed session mutations.
// Purpose: Give the route layer a typed payload to forward to the gateway.
// Dependencies: crate::core::tier, serde
// ============================================================================

//! ## Overview
//! Webhook events are tagged by `action`:
//! `{"action":"update_tier","api_key":"...","tier":"pro"}` or
//! `{"action":"invalidate_key","api_key":"..."}`.

use serde::Deserialize;
use serde::Serialize;

use crate::core::tier::Tier;

/// Session mutation pushed by the trusted backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WebhookEvent {
    /// Replace the cached tier for a key.
    UpdateTier {
        /// Target API key.
        api_key: String,
        /// New tier.
        tier: Tier,
    },
    /// Drop every cached state for a key.
    InvalidateKey {
        /// Target API key.
        api_key: String,
    },
}

impl WebhookEvent {
    /// Returns the stable action label.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::UpdateTier {
                ..
            } => "update_tier",
            Self::InvalidateKey {
                ..
            } => "invalidate_key",
        }
    }

    /// Returns the targeted API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        match self {
            Self::UpdateTier {
                api_key,
                ..
            }
            | Self::InvalidateKey {
                api_key,
            } => api_key,
        }
    }
}
