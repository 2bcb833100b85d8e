// crates/qrgate-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared harness wiring every gate component with test doubles.
// Purpose: Provide deterministic engines for scenario and concurrency tests.
// Dependencies: qrgate-core, async-trait
// ============================================================================

//! ## Overview
//! [`Harness`] assembles an engine and webhook gateway over a scriptable
//! in-process backend, a manual clock, an in-memory ledger, and a memory
//! audit sink.
//!
//! Security posture: the backend double can be taken offline to exercise
//! fail-closed and fail-open paths.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unwrap_in_result,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use qrgate_core::AccessDecisionEngine;
use qrgate_core::ApiKeyValidator;
use qrgate_core::BackendError;
use qrgate_core::BackendVerdict;
use qrgate_core::EngineComponents;
use qrgate_core::EngineConfig;
use qrgate_core::FailurePolicy;
use qrgate_core::Identity;
use qrgate_core::InMemoryUsageLedger;
use qrgate_core::KeyBackend;
use qrgate_core::ManualClock;
use qrgate_core::MemoryAuditSink;
use qrgate_core::RateLimiter;
use qrgate_core::SessionCache;
use qrgate_core::Tier;
use qrgate_core::TierPolicy;
use qrgate_core::Timestamp;
use qrgate_core::ValidatorConfig;
use qrgate_core::WebhookGateway;
use qrgate_core::time::DAY_MS;
use qrgate_core::time::MINUTE_MS;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Shared secret for backend calls and admin keys.
pub const BACKEND_SECRET: &str = "backend-secret-for-tests-0001";
/// Shared secret for webhook calls.
pub const WEBHOOK_SECRET: &str = "webhook-secret-for-tests-0001";
/// Session TTL used by the harness.
pub const SESSION_TTL: Duration = Duration::from_secs(300);
/// Grace horizon used by fail-open harnesses.
pub const GRACE_TTL: Duration = Duration::from_secs(3_600);

/// Harness start: 15 seconds into a minute, far from the epoch.
pub fn start() -> Timestamp {
    Timestamp::from_unix_millis(DAY_MS * 20_000 + 10 * MINUTE_MS + 15_000)
}

// ============================================================================
// SECTION: Backend Double
// ============================================================================

/// In-process key backend with a mutable key table.
///
/// The table is read when a call starts; the answer arrives after the
/// configured delay.
#[derive(Default)]
pub struct StaticBackend {
    /// Known keys.
    keys: Mutex<HashMap<String, Identity>>,
    /// When set, every call fails as unavailable.
    offline: AtomicBool,
    /// Artificial latency per call.
    delay_ms: AtomicUsize,
    /// Number of calls received.
    calls: AtomicUsize,
    /// Clock moved forward while each call is in flight.
    drift: Mutex<Option<(Arc<ManualClock>, Duration)>>,
}

impl StaticBackend {
    /// Registers `api_key` for `user_id` at `tier`.
    pub fn register(&self, api_key: &str, user_id: &str, tier: Tier) {
        self.keys.lock().unwrap().insert(api_key.to_string(), Identity::new(user_id, tier));
    }

    /// Removes `api_key` from the table.
    pub fn revoke(&self, api_key: &str) {
        self.keys.lock().unwrap().remove(api_key);
    }

    /// Takes the backend offline or back online.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Sets per-call latency.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(usize::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// Advances `clock` by `by` during every call, simulating a slow backend
    /// without real sleeping.
    pub fn set_drift(&self, clock: Arc<ManualClock>, by: Duration) {
        *self.drift.lock().unwrap() = Some((clock, by));
    }

    /// Returns the number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyBackend for StaticBackend {
    async fn validate(&self, api_key: &str) -> Result<BackendVerdict, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = self
            .keys
            .lock()
            .unwrap()
            .get(api_key)
            .cloned()
            .map_or(BackendVerdict::Invalid, BackendVerdict::Valid);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(u64::try_from(delay).unwrap())).await;
        }
        if let Some((clock, by)) = self.drift.lock().unwrap().as_ref() {
            clock.advance(*by);
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        Ok(verdict)
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Fully wired gate for tests.
pub struct Harness {
    /// Decision engine.
    pub engine: AccessDecisionEngine,
    /// Webhook gateway over the same cache.
    pub webhook: WebhookGateway,
    /// Shared session cache.
    pub cache: Arc<SessionCache>,
    /// Backend double.
    pub backend: Arc<StaticBackend>,
    /// Manual clock.
    pub clock: Arc<ManualClock>,
    /// Committed usage records.
    pub ledger: Arc<InMemoryUsageLedger>,
    /// Captured audit events.
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    /// Builds a harness with the default tier policy.
    pub fn new(failure_policy: FailurePolicy) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let audit = Arc::new(MemoryAuditSink::new());
        let backend = Arc::new(StaticBackend::default());
        let cache = Arc::new(SessionCache::new(1_024, GRACE_TTL));
        let ledger = Arc::new(InMemoryUsageLedger::new());
        let validator = Arc::new(ApiKeyValidator::new(
            backend.clone(),
            ValidatorConfig {
                request_timeout: Duration::from_secs(2),
                retry_backoff: Duration::from_millis(1),
                admin_secret: Some(BACKEND_SECRET.to_string()),
            },
            audit.clone(),
            clock.clone(),
        ));
        let engine = AccessDecisionEngine::new(
            EngineComponents {
                policy: Arc::new(TierPolicy::default()),
                cache: cache.clone(),
                validator,
                limiter: Arc::new(RateLimiter::new(1_024)),
                ledger: ledger.clone(),
                audit: audit.clone(),
                clock: clock.clone(),
            },
            EngineConfig {
                session_ttl: SESSION_TTL,
                failure_policy,
            },
        );
        let webhook = WebhookGateway::new(cache.clone(), WEBHOOK_SECRET, audit.clone(), clock.clone());
        Self {
            engine,
            webhook,
            cache,
            backend,
            clock,
            ledger,
            audit,
        }
    }

    /// Builds a fail-closed harness.
    pub fn fail_closed() -> Self {
        Self::new(FailurePolicy::FailClosed)
    }

    /// Builds a fail-open harness with [`GRACE_TTL`].
    pub fn fail_open() -> Self {
        Self::new(FailurePolicy::FailOpen {
            grace: GRACE_TTL,
        })
    }
}
