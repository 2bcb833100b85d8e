// crates/qrgate-core/src/core/tier.rs
// ============================================================================
// Module: QR Gate Tier Policy
// Description: Subscription tiers and their immutable entitlement records.
// Purpose: Map a closed set of tier names onto rate, size, and style limits.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Tiers are a closed enumeration. [`TierPolicy`] binds every tier to exactly
//! one [`TierEntitlements`] record at startup and is read-only afterwards, so
//! a policy snapshot taken by a decision can never be partially updated.
//! Adding or changing limits is a configuration change, not new control flow.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum length of a style name.
pub const MAX_STYLE_NAME_LENGTH: usize = 32;
/// Styles available to paid tiers by default.
const PAID_STYLES: &[&str] = &["basic", "text", "logo", "artistic", "qart", "embed"];
/// Styles available to the free tier by default.
const FREE_STYLES: &[&str] = &["basic", "text"];

// ============================================================================
// SECTION: Tier
// ============================================================================

/// Subscription tier.
///
/// # Invariants
/// - Variants are stable; serialized names are lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Free tier.
    Free,
    /// Pro subscription.
    Pro,
    /// Business subscription.
    Business,
    /// Internal tier for backend services.
    Admin,
}

impl Tier {
    /// All tiers in ascending order.
    pub const ALL: [Self; 4] = [Self::Free, Self::Pro, Self::Business, Self::Admin];

    /// Returns the stable tier name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Business => "business",
            Self::Admin => "admin",
        }
    }

    /// Parses a tier name (case-insensitive, surrounding whitespace ignored).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|tier| tier.as_str().eq_ignore_ascii_case(value))
    }

    /// Returns true when the tier is shown in public catalogs.
    #[must_use]
    pub const fn is_public(self) -> bool {
        !matches!(self, Self::Admin)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| PolicyError::UnknownTier(value.to_string()))
    }
}

// ============================================================================
// SECTION: Entitlements
// ============================================================================

/// Per-key rate budget for both fixed windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Requests allowed per calendar minute.
    pub per_minute: u32,
    /// Requests allowed per UTC day.
    pub per_day: u32,
}

/// Entitlements granted by a tier.
///
/// # Invariants
/// - Style names are lowercase and validated by [`TierPolicy::from_map`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierEntitlements {
    /// Requests allowed per calendar minute.
    pub requests_per_minute: u32,
    /// Requests allowed per UTC day.
    pub requests_per_day: u32,
    /// Largest output edge in pixels.
    pub max_pixel_size: u32,
    /// Largest batch size (zero disables batches).
    pub batch_limit: u32,
    /// Styles the tier may render.
    pub allowed_styles: BTreeSet<String>,
    /// Whether custom hex colours are allowed.
    pub custom_colors: bool,
    /// Queue priority hint (higher first).
    pub priority: u32,
}

impl TierEntitlements {
    /// Returns the built-in entitlements for `tier`.
    #[must_use]
    pub fn defaults_for(tier: Tier) -> Self {
        match tier {
            Tier::Free => Self::build(5, 10, 500, 0, FREE_STYLES, false, 1),
            Tier::Pro => Self::build(30, 500, 2_000, 10, PAID_STYLES, true, 5),
            Tier::Business => Self::build(100, 5_000, 4_000, 50, PAID_STYLES, true, 10),
            Tier::Admin => Self::build(1_000, 100_000, 4_000, 100, PAID_STYLES, true, 100),
        }
    }

    /// Builds an entitlement record from raw values.
    fn build(
        requests_per_minute: u32,
        requests_per_day: u32,
        max_pixel_size: u32,
        batch_limit: u32,
        styles: &[&str],
        custom_colors: bool,
        priority: u32,
    ) -> Self {
        Self {
            requests_per_minute,
            requests_per_day,
            max_pixel_size,
            batch_limit,
            allowed_styles: styles.iter().map(|style| (*style).to_string()).collect(),
            custom_colors,
            priority,
        }
    }

    /// Returns the rate budget for this tier.
    #[must_use]
    pub const fn rate_limits(&self) -> RateLimits {
        RateLimits {
            per_minute: self.requests_per_minute,
            per_day: self.requests_per_day,
        }
    }

    /// Returns true when `style` is allowed (case-insensitive).
    #[must_use]
    pub fn allows_style(&self, style: &str) -> bool {
        let normalized = style.trim().to_ascii_lowercase();
        self.allowed_styles.contains(&normalized)
    }

    /// Validates the record for `tier`.
    fn validate(&self, tier: Tier) -> Result<(), PolicyError> {
        for style in &self.allowed_styles {
            if !is_valid_style_name(style) {
                return Err(PolicyError::Invalid(format!(
                    "tier {tier} has invalid style name '{style}'"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Policy Table
// ============================================================================

/// Immutable mapping from every tier to its entitlements.
///
/// # Invariants
/// - Holds exactly one record for each [`Tier`] variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    /// Free tier entitlements.
    free: TierEntitlements,
    /// Pro tier entitlements.
    pro: TierEntitlements,
    /// Business tier entitlements.
    business: TierEntitlements,
    /// Admin tier entitlements.
    admin: TierEntitlements,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            free: TierEntitlements::defaults_for(Tier::Free),
            pro: TierEntitlements::defaults_for(Tier::Pro),
            business: TierEntitlements::defaults_for(Tier::Business),
            admin: TierEntitlements::defaults_for(Tier::Admin),
        }
    }
}

impl TierPolicy {
    /// Builds a policy from a complete tier map.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when a tier is missing or a record is invalid.
    pub fn from_map(mut entries: BTreeMap<Tier, TierEntitlements>) -> Result<Self, PolicyError> {
        let mut take = |tier: Tier| -> Result<TierEntitlements, PolicyError> {
            let record = entries
                .remove(&tier)
                .ok_or_else(|| PolicyError::Invalid(format!("tier {tier} is not configured")))?;
            record.validate(tier)?;
            Ok(record)
        };
        Ok(Self {
            free: take(Tier::Free)?,
            pro: take(Tier::Pro)?,
            business: take(Tier::Business)?,
            admin: take(Tier::Admin)?,
        })
    }

    /// Returns the entitlements for `tier`.
    #[must_use]
    pub const fn entitlements(&self, tier: Tier) -> &TierEntitlements {
        match tier {
            Tier::Free => &self.free,
            Tier::Pro => &self.pro,
            Tier::Business => &self.business,
            Tier::Admin => &self.admin,
        }
    }

    /// Returns the display summary for one tier.
    #[must_use]
    pub fn summary(&self, tier: Tier) -> TierSummary {
        let record = self.entitlements(tier);
        TierSummary {
            tier,
            limits: TierLimitsSummary {
                requests_per_minute: record.requests_per_minute,
                requests_per_day: record.requests_per_day,
                max_pixel_size: record.max_pixel_size,
                batch_limit: record.batch_limit,
            },
            features: TierFeaturesSummary {
                allowed_styles: record.allowed_styles.iter().cloned().collect(),
                custom_colors: record.custom_colors,
            },
        }
    }

    /// Returns summaries for the publicly listed tiers (admin excluded).
    #[must_use]
    pub fn public_catalog(&self) -> Vec<TierSummary> {
        Tier::ALL.into_iter().filter(|tier| tier.is_public()).map(|tier| self.summary(tier)).collect()
    }
}

// ============================================================================
// SECTION: Summaries
// ============================================================================

/// Serializable tier description for pricing and account pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierSummary {
    /// Tier name.
    pub tier: Tier,
    /// Numeric limits.
    pub limits: TierLimitsSummary,
    /// Feature flags.
    pub features: TierFeaturesSummary,
}

/// Numeric limits in a tier summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierLimitsSummary {
    /// Requests allowed per minute.
    pub requests_per_minute: u32,
    /// Requests allowed per day.
    pub requests_per_day: u32,
    /// Largest output edge in pixels.
    pub max_pixel_size: u32,
    /// Largest batch size.
    pub batch_limit: u32,
}

/// Feature flags in a tier summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierFeaturesSummary {
    /// Allowed style names, sorted.
    pub allowed_styles: Vec<String>,
    /// Whether custom hex colours are allowed.
    pub custom_colors: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tier policy construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// Tier name is not one of the known tiers.
    #[error("unknown tier: {0}")]
    UnknownTier(String),
    /// Policy table is incomplete or malformed.
    #[error("invalid tier policy: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true for lowercase ASCII style names within length bounds.
#[must_use]
pub fn is_valid_style_name(style: &str) -> bool {
    !style.is_empty()
        && style.len() <= MAX_STYLE_NAME_LENGTH
        && style.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}
