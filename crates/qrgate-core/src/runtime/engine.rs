// crates/qrgate-core/src/runtime/engine.rs
// ============================================================================
// Module: Access Decision Engine
// Description: Orchestrates sessions, tier policy, rate limits, and usage.
// Purpose: Produce one deterministic allow/deny verdict per request.
// Dependencies: crate::{audit, core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! [`AccessDecisionEngine::decide`] resolves the key (cache, then validator),
//! checks the tier's entitlements, charges the rate limiter, records the
//! outcome in the usage ledger, and audits the decision. Entitlement denials
//! never consume rate budget. Ledger failures never change the verdict.
//!
//! The clock is read again once the session is resolved: a backend call can
//! take several seconds and the session, rate charge, and audit record all
//! use the instant the decision is actually made.
//!
//! Security posture: every internal fault resolves to deny, and a backend
//! outage is fail-closed unless the fail-open grace policy is configured.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditSink;
use crate::audit::DecisionAuditEvent;
use crate::audit::LedgerAuditEvent;
use crate::audit::SessionSource;
use crate::core::AccessRequest;
use crate::core::ApiKeySession;
use crate::core::Clock;
use crate::core::Decision;
use crate::core::DenyReason;
use crate::core::ForbiddenReason;
use crate::core::Identity;
use crate::core::RateUsage;
use crate::core::TierEntitlements;
use crate::core::TierPolicy;
use crate::core::Timestamp;
use crate::core::UsageEntry;
use crate::core::hashing::api_key_hash;
use crate::core::hashing::key_fingerprint;
use crate::interfaces::LedgerError;
use crate::interfaces::UsageLedger;
use crate::runtime::rate_limiter::RateLimiter;
use crate::runtime::rate_limiter::RateVerdict;
use crate::runtime::session_cache::SessionCache;
use crate::runtime::session_cache::SessionCacheError;
use crate::runtime::validator::ApiKeyValidator;
use crate::runtime::validator::ValidationOutcome;
use crate::runtime::validator::is_well_formed;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Behavior when the key backend cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Treat the key as unauthorized.
    #[default]
    FailClosed,
    /// Reuse a last-known-good session validated within `grace`.
    FailOpen {
        /// Maximum age of a reusable session, measured from `validated_at`.
        grace: Duration,
    },
}

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Freshness window of a validated session.
    pub session_ttl: Duration,
    /// Backend outage policy.
    pub failure_policy: FailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(300),
            failure_policy: FailurePolicy::FailClosed,
        }
    }
}

/// Components the engine orchestrates.
pub struct EngineComponents {
    /// Immutable tier table.
    pub policy: Arc<TierPolicy>,
    /// Session cache shared with the webhook gateway.
    pub cache: Arc<SessionCache>,
    /// Backend validator.
    pub validator: Arc<ApiKeyValidator>,
    /// Rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Usage ledger (normally buffered).
    pub ledger: Arc<dyn UsageLedger>,
    /// Audit sink.
    pub audit: Arc<dyn AuditSink>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Resolved session plus how it was obtained.
struct Resolved {
    /// Session used for the decision.
    session: ApiKeySession,
    /// Resolution path.
    source: SessionSource,
}

/// Single entry point for access decisions.
pub struct AccessDecisionEngine {
    /// Orchestrated components.
    parts: EngineComponents,
    /// Settings.
    config: EngineConfig,
}

impl AccessDecisionEngine {
    /// Builds an engine.
    #[must_use]
    pub const fn new(parts: EngineComponents, config: EngineConfig) -> Self {
        Self {
            parts,
            config,
        }
    }

    /// Returns the tier table.
    #[must_use]
    pub fn policy(&self) -> &TierPolicy {
        &self.parts.policy
    }

    /// Returns the session cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.parts.cache
    }

    /// Returns the rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.parts.limiter
    }

    /// Returns the engine settings.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decides whether `request` may proceed.
    pub async fn decide(&self, request: &AccessRequest) -> Decision {
        let resolved = self.resolve(&request.api_key).await;
        let now = self.parts.clock.now();
        let (decision, source) = match resolved {
            Ok(resolved) => (self.authorize(request, &resolved.session, now), resolved.source),
            Err(reason) => (Decision::unauthenticated(reason), SessionSource::None),
        };
        self.record_usage(request, &decision, now);
        self.audit(request, &decision, source, now);
        decision
    }

    /// Returns the budget snapshot for `api_key` at `tier` without charging.
    ///
    /// # Errors
    ///
    /// Returns [`DenyReason::Internal`] when the limiter cannot be read.
    pub fn rate_usage(
        &self,
        api_key: &str,
        entitlements: &TierEntitlements,
    ) -> Result<RateUsage, DenyReason> {
        let now = self.parts.clock.now();
        self.parts
            .limiter
            .usage(api_key, entitlements.rate_limits(), now)
            .map_err(|_| DenyReason::Internal)
    }

    /// Finds a session for the key, validating on a miss.
    async fn resolve(&self, api_key: &str) -> Result<Resolved, DenyReason> {
        if !is_well_formed(api_key) {
            return Err(DenyReason::Unauthorized);
        }
        let cache = &self.parts.cache;
        let generation = cache.generation(api_key).map_err(|_| DenyReason::Internal)?;
        let now = self.parts.clock.now();
        if let Some(session) = cache.get(api_key, now).map_err(|_| DenyReason::Internal)? {
            return Ok(Resolved {
                session,
                source: SessionSource::Cache,
            });
        }
        let outcome = self
            .parts
            .validator
            .validate_since(api_key, generation)
            .await
            .map_err(|_| DenyReason::Internal)?;
        let now = self.parts.clock.now();
        match outcome {
            ValidationOutcome::Valid(identity) => {
                self.store(api_key, identity, now, generation, SessionSource::Backend)
            }
            ValidationOutcome::AdminKey(identity) => {
                self.store(api_key, identity, now, generation, SessionSource::AdminKey)
            }
            ValidationOutcome::Invalid => {
                cache.evict(api_key).map_err(|_| DenyReason::Internal)?;
                Err(DenyReason::Unauthorized)
            }
            ValidationOutcome::Unavailable(_) => self.fallback(api_key, now),
        }
    }

    /// Caches a validated identity unless a webhook touched the key's shard
    /// since `generation`; either way this request is served. A full cache
    /// also still serves it.
    fn store(
        &self,
        api_key: &str,
        identity: Identity,
        now: Timestamp,
        generation: u64,
        source: SessionSource,
    ) -> Result<Resolved, DenyReason> {
        let ttl = self.config.session_ttl;
        let cached = self.parts.cache.put_if_current(api_key, identity.clone(), ttl, now, generation);
        let session = match cached {
            Ok(Some(session)) => session,
            Ok(None) | Err(SessionCacheError::Capacity(_)) => {
                ApiKeySession::new(api_key, identity, now, ttl)
            }
            Err(SessionCacheError::Poisoned) => return Err(DenyReason::Internal),
        };
        Ok(Resolved {
            session,
            source,
        })
    }

    /// Applies the outage policy.
    fn fallback(&self, api_key: &str, now: Timestamp) -> Result<Resolved, DenyReason> {
        match self.config.failure_policy {
            FailurePolicy::FailClosed => Err(DenyReason::Unauthorized),
            FailurePolicy::FailOpen {
                grace,
            } => match self.parts.cache.get_stale(api_key, now, grace) {
                Ok(Some(session)) => Ok(Resolved {
                    session,
                    source: SessionSource::Grace,
                }),
                Ok(None) => Err(DenyReason::BackendUnavailable),
                Err(_) => Err(DenyReason::Internal),
            },
        }
    }

    /// Checks entitlements and charges the rate limiter.
    fn authorize(&self, request: &AccessRequest, session: &ApiKeySession, now: Timestamp) -> Decision {
        let entitlements = self.parts.policy.entitlements(session.tier);
        if let Some(reason) = check_entitlements(entitlements, request) {
            return Decision::denied(
                session.user_id.clone(),
                session.tier,
                DenyReason::TierForbidden(reason),
            );
        }
        match self.parts.limiter.check_and_increment(
            &request.api_key,
            entitlements.rate_limits(),
            now,
        ) {
            Ok(RateVerdict::Allowed(usage)) => {
                Decision::allowed(session.user_id.clone(), session.tier, usage)
            }
            Ok(RateVerdict::Denied {
                window,
                retry_after,
                usage,
            }) => {
                let mut decision = Decision::denied(
                    session.user_id.clone(),
                    session.tier,
                    DenyReason::RateLimited(window),
                );
                decision.retry_after = Some(retry_after);
                decision.rate = Some(usage);
                decision
            }
            Err(_) => Decision::denied(session.user_id.clone(), session.tier, DenyReason::Internal),
        }
    }

    /// Submits the outcome to the ledger; failures are audited only.
    fn record_usage(&self, request: &AccessRequest, decision: &Decision, now: Timestamp) {
        let mut metadata = BTreeMap::new();
        metadata.insert("reason".to_string(), decision.reason_code().to_string());
        if let Some(detail) = decision.reason.and_then(DenyReason::detail_code) {
            metadata.insert("detail".to_string(), detail.to_string());
        }
        if let Some(tier) = decision.tier {
            metadata.insert("tier".to_string(), tier.as_str().to_string());
        }
        metadata.insert("size".to_string(), request.size.to_string());
        if request.is_batch {
            metadata.insert("batch_count".to_string(), request.batch_count.to_string());
        }
        let entry = UsageEntry {
            timestamp: now,
            user_id: decision.user_id.clone(),
            api_key_hash: api_key_hash(&request.api_key),
            style: request.style.clone(),
            success: decision.allow,
            metadata,
        };
        match self.parts.ledger.record(entry) {
            Ok(()) | Err(LedgerError::Overloaded) => {}
            Err(err) => self.parts.audit.record_ledger(&LedgerAuditEvent::new(
                now,
                "append_failed",
                err.to_string(),
            )),
        }
    }

    /// Emits the decision audit event.
    fn audit(
        &self,
        request: &AccessRequest,
        decision: &Decision,
        source: SessionSource,
        now: Timestamp,
    ) {
        let retry_after_ms =
            decision.retry_after.map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self.parts.audit.record_decision(&DecisionAuditEvent {
            event: "access_decision",
            timestamp_ms: now.as_unix_millis(),
            key_fingerprint: key_fingerprint(&request.api_key),
            user_id: decision.user_id.clone(),
            tier: decision.tier,
            style: request.style.clone(),
            allow: decision.allow,
            reason: decision.reason_code(),
            detail: decision.reason.and_then(DenyReason::detail_code),
            retry_after_ms,
            session_source: source,
        });
    }
}

// ============================================================================
// SECTION: Entitlements
// ============================================================================

/// Returns the first entitlement `request` violates.
///
/// Checks run in order: style, size, batch, custom colours. A tier with a
/// zero batch limit cannot submit batches at all.
#[must_use]
pub fn check_entitlements(
    entitlements: &TierEntitlements,
    request: &AccessRequest,
) -> Option<ForbiddenReason> {
    if !entitlements.allows_style(&request.style) {
        return Some(ForbiddenReason::StyleNotAllowed);
    }
    if request.size > entitlements.max_pixel_size {
        return Some(ForbiddenReason::SizeExceeded);
    }
    if request.is_batch
        && (entitlements.batch_limit == 0 || request.batch_count > entitlements.batch_limit)
    {
        return Some(ForbiddenReason::BatchExceeded);
    }
    if request.custom_colors && !entitlements.custom_colors {
        return Some(ForbiddenReason::CustomColorsNotAllowed);
    }
    None
}

// ============================================================================
// SECTION: Tests
// ============================================================================
