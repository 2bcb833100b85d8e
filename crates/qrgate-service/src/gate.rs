// crates/qrgate-service/src/gate.rs
// ============================================================================
// Module: Access Gate
// Description: Assembles the decision engine and its collaborators from config.
// Purpose: Provide the service-facing gate, usage queries, and maintenance.
// Dependencies: qrgate-config, qrgate-core, qrgate-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! [`AccessGate`] owns one decision engine, the webhook gateway sharing its
//! session cache, and the buffered usage ledger. It is built once from a
//! validated [`QrGateConfig`]; nothing reads configuration after that.
//! [`AccessGate::run_maintenance`] periodically sweeps idle sessions and rate
//! counters and applies usage retention.
//!
//! Security posture: startup emits a security audit event when a secret falls
//! back to the development placeholder.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use qrgate_config::QrGateConfig;
use qrgate_config::UsageStoreKind;
use qrgate_core::AccessDecisionEngine;
use qrgate_core::AccessRequest;
use qrgate_core::ApiKeyValidator;
use qrgate_core::AuditSink;
use qrgate_core::BufferedUsageLedger;
use qrgate_core::Clock;
use qrgate_core::Decision;
use qrgate_core::EngineComponents;
use qrgate_core::FileAuditSink;
use qrgate_core::InMemoryUsageLedger;
use qrgate_core::KeyBackend;
use qrgate_core::LedgerError;
use qrgate_core::NoopAuditSink;
use qrgate_core::RateLimiter;
use qrgate_core::SecurityAuditEvent;
use qrgate_core::SessionCache;
use qrgate_core::StderrAuditSink;
use qrgate_core::SystemClock;
use qrgate_core::TierSummary;
use qrgate_core::Timestamp;
use qrgate_core::UsageLedger;
use qrgate_core::UsageRecord;
use qrgate_core::UsageStats;
use qrgate_core::WebhookGateway;
use qrgate_core::audit::LedgerAuditEvent;
use qrgate_store_sqlite::SqliteLedgerConfig;
use qrgate_store_sqlite::SqliteUsageLedger;
use thiserror::Error;

use crate::backend::HttpKeyBackend;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Seconds per retention day.
const SECONDS_PER_DAY: u64 = 86_400;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gate assembly errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateBuildError {
    /// Configuration could not be resolved.
    #[error("gate config error: {0}")]
    Config(String),
    /// Audit sink could not be opened.
    #[error("gate audit error: {0}")]
    Audit(String),
    /// Usage store could not be opened.
    #[error("gate store error: {0}")]
    Store(String),
    /// Backend client could not be built.
    #[error("gate backend error: {0}")]
    Backend(String),
    /// No tokio runtime is available for the ledger flusher.
    #[error("gate runtime error: {0}")]
    Runtime(String),
}

/// Maintenance pass failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaintenanceError {
    /// Session sweep failed.
    #[error("session sweep failed: {0}")]
    Sessions(String),
    /// Rate counter sweep failed.
    #[error("rate counter sweep failed: {0}")]
    Counters(String),
    /// Usage retention failed.
    #[error("usage retention failed: {0}")]
    Usage(String),
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Sessions dropped past their retention horizon.
    pub sessions_removed: usize,
    /// Idle rate counters dropped.
    pub counters_removed: usize,
    /// Usage records removed by retention.
    pub usage_removed: u64,
}

/// Fully assembled access gate.
///
/// # Invariants
/// - The engine and webhook gateway share one session cache.
/// - Usage reads flush the buffered ledger first, so every entry recorded
///   before the call is visible to it.
pub struct AccessGate {
    /// Decision engine.
    engine: AccessDecisionEngine,
    /// Webhook gateway.
    webhook: WebhookGateway,
    /// Buffered usage ledger shared with the engine.
    ledger: Arc<BufferedUsageLedger>,
    /// Shared session cache.
    cache: Arc<SessionCache>,
    /// Shared rate limiter.
    limiter: Arc<RateLimiter>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Usage retention in days.
    retention_days: u32,
    /// Delay between maintenance passes.
    maintenance_interval: Duration,
}

impl AccessGate {
    /// Builds the gate with the HTTP backend, the configured audit sink and
    /// store, and the system clock. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`GateBuildError`] when any component cannot be created.
    pub fn from_config(config: &QrGateConfig) -> Result<Self, GateBuildError> {
        let secret = config.backend_secret().map_err(|err| GateBuildError::Config(err.to_string()))?;
        let backend = HttpKeyBackend::new(
            config.backend.base_url(),
            &secret,
            Duration::from_millis(config.backend.connect_timeout_ms),
            Duration::from_millis(config.backend.request_timeout_ms),
        )
        .map_err(|err| GateBuildError::Backend(err.to_string()))?;
        let audit = build_audit_sink(config)?;
        Self::from_parts(config, Arc::new(backend), audit, Arc::new(SystemClock))
    }

    /// Builds the gate around an explicit backend, audit sink, and clock.
    /// Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`GateBuildError`] when any component cannot be created.
    pub fn from_parts(
        config: &QrGateConfig,
        backend: Arc<dyn KeyBackend>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateBuildError> {
        let policy = config.tier_policy().map_err(|err| GateBuildError::Config(err.to_string()))?;
        let validator_config =
            config.validator_config().map_err(|err| GateBuildError::Config(err.to_string()))?;
        let webhook_secret =
            config.webhook_secret().map_err(|err| GateBuildError::Config(err.to_string()))?;

        let store = build_store(config)?;
        let ledger = Arc::new(
            BufferedUsageLedger::spawn(
                store,
                config.usage.buffer_capacity,
                Arc::clone(&audit),
                Arc::clone(&clock),
            )
            .map_err(|err| GateBuildError::Runtime(err.to_string()))?,
        );
        let cache = Arc::new(SessionCache::new(config.session.max_entries, config.session.retention()));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.max_entries));
        let validator = Arc::new(ApiKeyValidator::new(
            backend,
            validator_config,
            Arc::clone(&audit),
            Arc::clone(&clock),
        ));
        let engine = AccessDecisionEngine::new(
            EngineComponents {
                policy: Arc::new(policy),
                cache: Arc::clone(&cache),
                validator,
                limiter: Arc::clone(&limiter),
                ledger: Arc::clone(&ledger) as Arc<dyn UsageLedger>,
                audit: Arc::clone(&audit),
                clock: Arc::clone(&clock),
            },
            config.engine_config(),
        );
        let webhook = WebhookGateway::new(
            Arc::clone(&cache),
            webhook_secret,
            Arc::clone(&audit),
            Arc::clone(&clock),
        );

        if config.uses_placeholder_secret() {
            audit.record_security(&SecurityAuditEvent::new(
                clock.now(),
                "placeholder_secret",
                "running with the development placeholder secret; set QRGATE_BACKEND_SECRET \
                 before deploying",
            ));
        }

        Ok(Self {
            engine,
            webhook,
            ledger,
            cache,
            limiter,
            audit,
            clock,
            retention_days: config.usage.retention_days,
            maintenance_interval: Duration::from_secs(config.usage.maintenance_interval_secs),
        })
    }

    /// Decides one request.
    pub async fn decide(&self, request: &AccessRequest) -> Decision {
        self.engine.decide(request).await
    }

    /// Returns the decision engine.
    #[must_use]
    pub const fn engine(&self) -> &AccessDecisionEngine {
        &self.engine
    }

    /// Returns the webhook gateway.
    #[must_use]
    pub const fn webhook(&self) -> &WebhookGateway {
        &self.webhook
    }

    /// Returns the public tier catalog for pricing pages.
    #[must_use]
    pub fn tier_catalog(&self) -> Vec<TierSummary> {
        self.engine.policy().public_catalog()
    }

    // ------------------------------------------------------------------------
    // Usage surface
    // ------------------------------------------------------------------------

    /// Returns usage records after `since`, ordered by time.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be flushed or read.
    pub async fn get_usage_since(&self, since: Timestamp) -> Result<Vec<UsageRecord>, LedgerError> {
        self.ledger.flush().await?;
        self.ledger.get_since(since)
    }

    /// Removes usage older than `retention_days`, returning the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be flushed or updated.
    pub async fn cleanup_retention(&self, retention_days: u32) -> Result<u64, LedgerError> {
        self.ledger.flush().await?;
        let horizon = Duration::from_secs(u64::from(retention_days).saturating_mul(SECONDS_PER_DAY));
        self.ledger.cleanup(self.clock.now().saturating_sub(horizon))
    }

    /// Returns aggregate usage for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be flushed or read.
    pub async fn user_stats(&self, user_id: &str) -> Result<UsageStats, LedgerError> {
        self.ledger.flush().await?;
        self.ledger.user_stats(user_id)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Runs one maintenance pass.
    ///
    /// # Errors
    ///
    /// Returns [`MaintenanceError`] for the first step that fails.
    pub async fn maintain(&self) -> Result<MaintenanceReport, MaintenanceError> {
        let now = self.clock.now();
        let sessions_removed =
            self.cache.sweep(now).map_err(|err| MaintenanceError::Sessions(err.to_string()))?;
        let counters_removed =
            self.limiter.sweep(now).map_err(|err| MaintenanceError::Counters(err.to_string()))?;
        let usage_removed = self
            .cleanup_retention(self.retention_days)
            .await
            .map_err(|err| MaintenanceError::Usage(err.to_string()))?;
        Ok(MaintenanceReport {
            sessions_removed,
            counters_removed,
            usage_removed,
        })
    }

    /// Runs maintenance every configured interval until `shutdown` resolves.
    pub async fn run_maintenance<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.maintenance_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.maintain().await {
                        self.audit.record_ledger(&LedgerAuditEvent::new(
                            self.clock.now(),
                            "maintenance_failed",
                            err.to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Flushes pending usage, drops the gate, waits for the ledger flusher
    /// to exit, then flushes the audit sink.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the flusher already stopped or panicked.
    pub async fn shutdown(self) -> Result<(), LedgerError> {
        let handle = self.ledger.close().await?;
        let audit = Arc::clone(&self.audit);
        drop(self);
        if let Some(handle) = handle {
            handle.await.map_err(|err| LedgerError::Storage(err.to_string()))?;
        }
        tokio::task::spawn_blocking(move || audit.flush())
            .await
            .map_err(|err| LedgerError::Storage(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Opens the configured audit sink.
fn build_audit_sink(config: &QrGateConfig) -> Result<Arc<dyn AuditSink>, GateBuildError> {
    if !config.audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match &config.audit.path {
        Some(path) => {
            let sink = FileAuditSink::new(path).map_err(|err| GateBuildError::Audit(err.to_string()))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(StderrAuditSink)),
    }
}

/// Opens the configured usage store.
fn build_store(config: &QrGateConfig) -> Result<Arc<dyn UsageLedger>, GateBuildError> {
    match (config.usage.store, &config.usage.path) {
        (UsageStoreKind::Memory, _) => Ok(Arc::new(InMemoryUsageLedger::new())),
        (UsageStoreKind::Sqlite, Some(path)) => {
            let ledger = SqliteUsageLedger::open(&SqliteLedgerConfig::new(path))
                .map_err(|err| GateBuildError::Store(err.to_string()))?;
            Ok(Arc::new(ledger))
        }
        (UsageStoreKind::Sqlite, None) => {
            Err(GateBuildError::Store("usage.path is required for the sqlite store".to_string()))
        }
    }
}
