// crates/qrgate-core/src/runtime/webhook.rs
// ============================================================================
// Module: Webhook Gateway
// Description: Authenticated backend-pushed tier updates and key invalidation.
// Purpose: Apply trusted session mutations through the session cache.
// Dependencies: crate::{audit, core, runtime::session_cache}, thiserror
// ============================================================================

//! ## Overview
//! The backend pushes [`WebhookEvent`]s with a shared secret. The secret is
//! compared as SHA-256 digests in constant time; any failure (missing,
//! wrong, or unconfigured secret) is one generic [`WebhookError::Unauthorized`]
//! and leaves the cache untouched. Accepted events mutate the
//! [`SessionCache`] under its shard lock, the same boundary decisions read
//! through.
//!
//! Security posture: rejected calls are audited without the presented
//! secret, its length, or the target key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

use crate::audit::AuditSink;
use crate::audit::WebhookAuditEvent;
use crate::core::Clock;
use crate::core::Tier;
use crate::core::WebhookEvent;
use crate::core::hashing::key_fingerprint;
use crate::core::hashing::secrets_match_str;
use crate::runtime::session_cache::SessionCache;
use crate::runtime::session_cache::SessionCacheError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Webhook failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    /// Secret missing or wrong.
    #[error("unauthorized")]
    Unauthorized,
    /// Session cache failure.
    #[error("webhook cache error: {0}")]
    Cache(String),
}

impl From<SessionCacheError> for WebhookError {
    fn from(err: SessionCacheError) -> Self {
        Self::Cache(err.to_string())
    }
}

/// Effect of an accepted webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A cached session was changed or removed.
    Applied,
    /// No session was cached for the key.
    NotCached,
}

impl WebhookOutcome {
    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::NotCached => "not_cached",
        }
    }
}

/// Authenticated entry point for backend session mutations.
pub struct WebhookGateway {
    /// Cache receiving mutations.
    cache: Arc<SessionCache>,
    /// Configured shared secret.
    secret: String,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Time source for tier assignment and audit timestamps.
    clock: Arc<dyn Clock>,
}

impl WebhookGateway {
    /// Builds a gateway; an empty `secret` rejects every call.
    #[must_use]
    pub fn new(
        cache: Arc<SessionCache>,
        secret: impl Into<String>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            secret: secret.into(),
            audit,
            clock,
        }
    }

    /// Authenticates and applies a parsed event.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Unauthorized`] on any secret failure, or
    /// [`WebhookError::Cache`] when the cache cannot be updated.
    pub fn handle(
        &self,
        presented_secret: Option<&str>,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, WebhookError> {
        self.authenticate(presented_secret, event.action())?;
        let now = self.clock.now();
        let applied = match event {
            WebhookEvent::UpdateTier {
                api_key,
                tier,
            } => self.cache.update_tier(api_key, *tier, now)?,
            WebhookEvent::InvalidateKey {
                api_key,
            } => self.cache.invalidate(api_key)?,
        };
        let outcome = if applied { WebhookOutcome::Applied } else { WebhookOutcome::NotCached };
        self.audit.record_webhook(&WebhookAuditEvent::new(
            now,
            event.action(),
            outcome.as_str(),
            Some(key_fingerprint(event.api_key())),
        ));
        Ok(outcome)
    }

    /// Replaces the cached tier for `api_key`.
    ///
    /// # Errors
    ///
    /// See [`WebhookGateway::handle`].
    pub fn update_tier(
        &self,
        presented_secret: Option<&str>,
        api_key: &str,
        tier: Tier,
    ) -> Result<WebhookOutcome, WebhookError> {
        self.handle(presented_secret, &WebhookEvent::UpdateTier {
            api_key: api_key.to_string(),
            tier,
        })
    }

    /// Drops every cached state for `api_key`.
    ///
    /// # Errors
    ///
    /// See [`WebhookGateway::handle`].
    pub fn invalidate_key(
        &self,
        presented_secret: Option<&str>,
        api_key: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        self.handle(presented_secret, &WebhookEvent::InvalidateKey {
            api_key: api_key.to_string(),
        })
    }

    /// Checks the presented secret, auditing rejections.
    fn authenticate(
        &self,
        presented_secret: Option<&str>,
        action: &'static str,
    ) -> Result<(), WebhookError> {
        let accepted = !self.secret.is_empty()
            && presented_secret.is_some_and(|presented| secrets_match_str(presented, &self.secret));
        if accepted {
            return Ok(());
        }
        self.audit.record_webhook(&WebhookAuditEvent::new(
            self.clock.now(),
            action,
            "rejected",
            None,
        ));
        Err(WebhookError::Unauthorized)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
