// crates/qrgate-core/src/runtime/validator.rs
// ============================================================================
// Module: API Key Validator
// Description: Coalesced, time-bounded API key validation against the backend.
// Purpose: Resolve unknown or expired keys with one backend call per key.
// Dependencies: crate::{audit, core, interfaces}, tokio, thiserror
// ============================================================================

//! ## Overview
//! [`ApiKeyValidator::validate`] resolves a key in three steps:
//! - malformed keys (empty or oversized) are rejected locally;
//! - internal admin keys are verified locally against the backend secret;
//! - everything else goes to the [`KeyBackend`] under a hard timeout with at
//!   most one retry after backoff.
//!
//! Concurrent validations for the same key share one in-flight call. Each
//! call is tagged with the session cache generation its first caller read;
//! a caller holding a newer generation starts a fresh call instead of
//! joining one that began before a revocation. The in-flight table lock is
//! never held across an await.
//!
//! Security posture: keys are only logged as fingerprints and admin tags are
//! compared in constant time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::OnceCell;

use crate::audit::AuditSink;
use crate::audit::BackendAuditEvent;
use crate::core::Clock;
use crate::core::Identity;
use crate::core::Tier;
use crate::core::hashing::key_fingerprint;
use crate::core::hashing::secrets_match_str;
use crate::core::hashing::sha256_hex;
use crate::interfaces::BackendError;
use crate::interfaces::BackendVerdict;
use crate::interfaces::KeyBackend;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted API key length in bytes.
pub const MAX_API_KEY_BYTES: usize = 256;
/// Prefix carried by internal admin keys.
pub const ADMIN_KEY_PREFIX: &str = "qrb_admin_";
/// User id assigned to admin key sessions.
pub const ADMIN_USER_ID: &str = "admin";
/// Hex characters in an admin key tag.
const ADMIN_TAG_HEX_CHARS: usize = 16;
/// Maximum admin nonce length.
const MAX_ADMIN_NONCE_CHARS: usize = 64;
/// Retries after the first failed backend attempt.
const MAX_RETRIES: u32 = 1;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Validator tuning.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Hard timeout for one backend attempt.
    pub request_timeout: Duration,
    /// Delay before the single retry.
    pub retry_backoff: Duration,
    /// Backend shared secret used to verify admin keys; `None` disables them.
    pub admin_secret: Option<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(200),
            admin_secret: None,
        }
    }
}

/// Result of resolving a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Backend confirmed the key.
    Valid(Identity),
    /// Key verified locally as an internal admin key.
    AdminKey(Identity),
    /// Key is malformed, unknown, or revoked. Terminal.
    Invalid,
    /// Backend could not answer after the retry.
    Unavailable(BackendError),
}

/// Validator failures unrelated to the key itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidatorError {
    /// In-flight table lock was poisoned.
    #[error("validator in-flight table poisoned")]
    Poisoned,
}

/// Shared in-flight slot for one key.
type InFlight = Arc<OnceCell<ValidationOutcome>>;

/// In-flight slot plus the cache generation it started at.
struct InFlightCall {
    /// Generation read by the caller that started the call.
    generation: u64,
    /// Shared result slot.
    cell: InFlight,
}

/// Coalescing API key validator.
pub struct ApiKeyValidator {
    /// Authoritative key lookup.
    backend: Arc<dyn KeyBackend>,
    /// Timeout, retry, and admin settings.
    config: ValidatorConfig,
    /// In-flight validations keyed by raw API key.
    inflight: Mutex<HashMap<String, InFlightCall>>,
    /// Audit sink for backend faults.
    audit: Arc<dyn AuditSink>,
    /// Time source for audit timestamps.
    clock: Arc<dyn Clock>,
}

impl ApiKeyValidator {
    /// Builds a validator over `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn KeyBackend>,
        config: ValidatorConfig,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            config,
            inflight: Mutex::new(HashMap::new()),
            audit,
            clock,
        }
    }

    /// Resolves `api_key`, sharing any in-flight backend call for it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError::Poisoned`] when the in-flight table is poisoned.
    pub async fn validate(&self, api_key: &str) -> Result<ValidationOutcome, ValidatorError> {
        self.validate_since(api_key, 0).await
    }

    /// Resolves `api_key` for a caller that read cache generation
    /// `generation`, joining only in-flight calls started at that generation
    /// or later.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError::Poisoned`] when the in-flight table is poisoned.
    pub async fn validate_since(
        &self,
        api_key: &str,
        generation: u64,
    ) -> Result<ValidationOutcome, ValidatorError> {
        if !is_well_formed(api_key) {
            return Ok(ValidationOutcome::Invalid);
        }
        if api_key.starts_with(ADMIN_KEY_PREFIX) {
            return Ok(self.validate_admin_key(api_key));
        }

        let cell = {
            let mut inflight = self.inflight.lock().map_err(|_| ValidatorError::Poisoned)?;
            match inflight.get(api_key) {
                Some(call) if call.generation >= generation => Arc::clone(&call.cell),
                _ => {
                    let cell = InFlight::default();
                    inflight.insert(api_key.to_string(), InFlightCall {
                        generation,
                        cell: Arc::clone(&cell),
                    });
                    cell
                }
            }
        };
        let outcome = cell.get_or_init(|| self.call_backend(api_key)).await.clone();
        {
            let mut inflight = self.inflight.lock().map_err(|_| ValidatorError::Poisoned)?;
            if inflight.get(api_key).is_some_and(|current| Arc::ptr_eq(&current.cell, &cell)) {
                inflight.remove(api_key);
            }
        }
        Ok(outcome)
    }

    /// Returns the number of keys with a validation in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().map(|inflight| inflight.len()).unwrap_or(0)
    }

    /// Verifies an admin key locally.
    fn validate_admin_key(&self, api_key: &str) -> ValidationOutcome {
        let Some(secret) = self.config.admin_secret.as_deref() else {
            return ValidationOutcome::Invalid;
        };
        if verify_admin_key(secret, api_key) {
            ValidationOutcome::AdminKey(Identity::new(ADMIN_USER_ID, Tier::Admin))
        } else {
            ValidationOutcome::Invalid
        }
    }

    /// Calls the backend with a hard timeout and at most one retry.
    async fn call_backend(&self, api_key: &str) -> ValidationOutcome {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.config.request_timeout,
                self.backend.validate(api_key),
            )
            .await
            .unwrap_or(Err(BackendError::Timeout));
            match result {
                Ok(BackendVerdict::Valid(identity)) => return ValidationOutcome::Valid(identity),
                Ok(BackendVerdict::Invalid) => return ValidationOutcome::Invalid,
                Err(err) if attempt < MAX_RETRIES => {
                    self.record(api_key, "retrying", &err);
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(err) => {
                    self.record(api_key, "unavailable", &err);
                    return ValidationOutcome::Unavailable(err);
                }
            }
        }
    }

    /// Emits a backend audit event.
    fn record(&self, api_key: &str, outcome: &'static str, err: &BackendError) {
        self.audit.record_backend(&BackendAuditEvent::new(
            self.clock.now(),
            key_fingerprint(api_key),
            outcome,
            err.to_string(),
        ));
    }
}

// ============================================================================
// SECTION: Key Format
// ============================================================================

/// Returns true when `api_key` is non-empty and within the length bound.
#[must_use]
pub const fn is_well_formed(api_key: &str) -> bool {
    !api_key.is_empty() && api_key.len() <= MAX_API_KEY_BYTES
}

/// Builds an admin key for `nonce` signed with `secret`.
///
/// Returns `None` when the nonce is empty, too long, or not alphanumeric.
#[must_use]
pub fn mint_admin_key(secret: &str, nonce: &str) -> Option<String> {
    if !is_valid_nonce(nonce) {
        return None;
    }
    let tag = admin_tag(secret, nonce);
    Some(format!("{ADMIN_KEY_PREFIX}{nonce}_{tag}"))
}

/// Returns true when `api_key` is an admin key signed with `secret`.
#[must_use]
pub fn verify_admin_key(secret: &str, api_key: &str) -> bool {
    let Some(rest) = api_key.strip_prefix(ADMIN_KEY_PREFIX) else {
        return false;
    };
    let Some((nonce, tag)) = rest.rsplit_once('_') else {
        return false;
    };
    if !is_valid_nonce(nonce) || secret.is_empty() {
        return false;
    }
    secrets_match_str(tag, &admin_tag(secret, nonce))
}

/// Computes the admin tag for `nonce`.
fn admin_tag(secret: &str, nonce: &str) -> String {
    let mut digest = sha256_hex(format!("{secret}:{ADMIN_KEY_PREFIX}{nonce}").as_bytes());
    digest.truncate(ADMIN_TAG_HEX_CHARS);
    digest
}

/// Returns true for non-empty ASCII alphanumeric nonces within the bound.
fn is_valid_nonce(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce.len() <= MAX_ADMIN_NONCE_CHARS
        && nonce.bytes().all(|byte| byte.is_ascii_alphanumeric())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
