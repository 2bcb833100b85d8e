// crates/qrgate-core/src/core/decision.rs
// ============================================================================
// Module: QR Gate Access Decisions
// Description: Access requests, verdicts, and stable deny reason codes.
// Purpose: Define the decision contract consumed by the request layer.
// Dependencies: crate::core::{tier, time}, serde
// ============================================================================

//! ## Overview
//! A [`Decision`] is the only thing the request layer needs to gate
//! generation: `allow`, the resolved identity, a stable reason code, and a
//! `retry_after` for rate-limited denials. Reason codes are stable snake_case
//! labels safe to surface to callers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::core::tier::Tier;
use crate::core::time::FixedWindow;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Inputs for one access decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Presented API key.
    pub api_key: String,
    /// Requested rendering style.
    pub style: String,
    /// Requested output edge in pixels.
    pub size: u32,
    /// Whether this is a batch request.
    pub is_batch: bool,
    /// Number of items in the batch (ignored when `is_batch` is false).
    pub batch_count: u32,
    /// Whether custom hex colours were requested.
    pub custom_colors: bool,
}

impl AccessRequest {
    /// Builds a single-item request.
    #[must_use]
    pub fn single(api_key: impl Into<String>, style: impl Into<String>, size: u32) -> Self {
        Self {
            api_key: api_key.into(),
            style: style.into(),
            size,
            is_batch: false,
            batch_count: 0,
            custom_colors: false,
        }
    }

    /// Builds a batch request of `batch_count` items.
    #[must_use]
    pub fn batch(
        api_key: impl Into<String>,
        style: impl Into<String>,
        size: u32,
        batch_count: u32,
    ) -> Self {
        Self {
            is_batch: true,
            batch_count,
            ..Self::single(api_key, style, size)
        }
    }

    /// Returns a copy that requests custom hex colours.
    #[must_use]
    pub const fn with_custom_colors(mut self) -> Self {
        self.custom_colors = true;
        self
    }
}

// ============================================================================
// SECTION: Reasons
// ============================================================================

/// Entitlement check that rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForbiddenReason {
    /// Style not in the tier's allowed set.
    StyleNotAllowed,
    /// Size above the tier's pixel limit.
    SizeExceeded,
    /// Batch larger than the tier's batch limit.
    BatchExceeded,
    /// Custom colours requested on a tier without them.
    CustomColorsNotAllowed,
}

impl ForbiddenReason {
    /// Returns the stable sub-reason code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::StyleNotAllowed => "style_not_allowed",
            Self::SizeExceeded => "size_exceeded",
            Self::BatchExceeded => "batch_exceeded",
            Self::CustomColorsNotAllowed => "custom_colors_not_allowed",
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// Key unknown, invalid, or unresolvable under fail-closed policy.
    Unauthorized,
    /// Backend unreachable and no policy fallback applied.
    BackendUnavailable,
    /// Tier does not grant the requested feature.
    TierForbidden(ForbiddenReason),
    /// Quota exhausted for the named window.
    RateLimited(FixedWindow),
    /// Cache or ledger fault; always resolved as deny.
    Internal,
}

impl DenyReason {
    /// Returns the stable reason code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::BackendUnavailable => "backend_unavailable",
            Self::TierForbidden(_) => "tier_forbidden",
            Self::RateLimited(_) => "rate_limited",
            Self::Internal => "internal",
        }
    }

    /// Returns the stable sub-reason code when one applies.
    #[must_use]
    pub const fn detail_code(self) -> Option<&'static str> {
        match self {
            Self::TierForbidden(reason) => Some(reason.code()),
            Self::RateLimited(window) => Some(window.as_str()),
            Self::Unauthorized | Self::BackendUnavailable | Self::Internal => None,
        }
    }

    /// Returns human-readable text for the caller.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Unauthorized => "invalid or unknown API key",
            Self::BackendUnavailable => "key validation backend unavailable",
            Self::TierForbidden(ForbiddenReason::StyleNotAllowed) => {
                "style requires a higher subscription tier"
            }
            Self::TierForbidden(ForbiddenReason::SizeExceeded) => {
                "requested size exceeds the tier limit"
            }
            Self::TierForbidden(ForbiddenReason::BatchExceeded) => {
                "batch size exceeds the tier limit"
            }
            Self::TierForbidden(ForbiddenReason::CustomColorsNotAllowed) => {
                "custom colors require a higher subscription tier"
            }
            Self::RateLimited(FixedWindow::Minute) => "per-minute rate limit exceeded",
            Self::RateLimited(FixedWindow::Day) => "daily rate limit exceeded",
            Self::Internal => "internal error",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail_code() {
            Some(detail) => write!(f, "{}:{detail}", self.code()),
            None => f.write_str(self.code()),
        }
    }
}

// ============================================================================
// SECTION: Rate Usage
// ============================================================================

/// Budget state of one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    /// Configured limit.
    pub limit: u32,
    /// Requests counted in the current window.
    pub used: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// First instant of the next window.
    pub resets_at: Timestamp,
}

/// Budget state of both windows for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateUsage {
    /// Minute window.
    pub minute: WindowUsage,
    /// Day window.
    pub day: WindowUsage,
}

// ============================================================================
// SECTION: Decision
// ============================================================================

/// Allow/deny verdict for one request.
///
/// # Invariants
/// - `allow` is true if and only if `reason` is `None`.
/// - `retry_after` is set only for rate-limited denials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether generation may proceed.
    pub allow: bool,
    /// Resolved user when the key authenticated.
    pub user_id: Option<String>,
    /// Resolved tier when the key authenticated.
    pub tier: Option<Tier>,
    /// Denial reason.
    pub reason: Option<DenyReason>,
    /// Time until the exhausted window resets.
    pub retry_after: Option<Duration>,
    /// Budget snapshot after the decision, when the rate limiter ran.
    pub rate: Option<RateUsage>,
}

impl Decision {
    /// Builds an allow verdict.
    #[must_use]
    pub fn allowed(user_id: String, tier: Tier, rate: RateUsage) -> Self {
        Self {
            allow: true,
            user_id: Some(user_id),
            tier: Some(tier),
            reason: None,
            retry_after: None,
            rate: Some(rate),
        }
    }

    /// Builds a deny verdict with no resolved identity.
    #[must_use]
    pub const fn unauthenticated(reason: DenyReason) -> Self {
        Self {
            allow: false,
            user_id: None,
            tier: None,
            reason: Some(reason),
            retry_after: None,
            rate: None,
        }
    }

    /// Builds a deny verdict for a resolved identity.
    #[must_use]
    pub fn denied(user_id: String, tier: Tier, reason: DenyReason) -> Self {
        Self {
            allow: false,
            user_id: Some(user_id),
            tier: Some(tier),
            reason: Some(reason),
            retry_after: None,
            rate: None,
        }
    }

    /// Returns the stable reason code (`allowed` on allow).
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        self.reason.map_or("allowed", DenyReason::code)
    }

    /// Returns `retry_after` rounded up to whole seconds.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|delay| {
            let secs = delay.as_secs();
            if delay.subsec_nanos() > 0 { secs + 1 } else { secs }
        })
    }
}
