// crates/qrgate-config/src/config.rs
// ============================================================================
// Module: QR Gate Configuration
// Description: Configuration loading and validation for the QR Gate.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: qrgate-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded once at startup from a TOML file with size and
//! path limits, validated, and then handed to each component as an immutable
//! value. Secrets may come from the file or from environment variables named
//! in the file; production refuses the development placeholder.
//!
//! Security posture: config inputs are untrusted; invalid or ambiguous
//! settings fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use qrgate_core::EngineConfig;
use qrgate_core::FailurePolicy;
use qrgate_core::Tier;
use qrgate_core::TierEntitlements;
use qrgate_core::TierPolicy;
use qrgate_core::ValidatorConfig;
use qrgate_core::core::tier::is_valid_style_name;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "qrgate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "QRGATE_CONFIG";
/// Default environment variable holding the backend secret.
pub const DEFAULT_BACKEND_SECRET_ENV: &str = "QRGATE_BACKEND_SECRET";
/// Default environment variable holding the webhook secret.
pub const DEFAULT_WEBHOOK_SECRET_ENV: &str = "QRGATE_WEBHOOK_SECRET";
/// Placeholder secret used in development when none is configured.
pub const DEV_PLACEHOLDER_SECRET: &str = "dev-secret-not-for-production";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum secret length in bytes.
pub(crate) const MIN_SECRET_BYTES: usize = 16;
/// Maximum secret length in bytes.
pub(crate) const MAX_SECRET_BYTES: usize = 512;
/// Maximum backend URL length.
pub(crate) const MAX_URL_LENGTH: usize = 2048;
/// Minimum backend connect timeout in milliseconds.
pub(crate) const MIN_CONNECT_TIMEOUT_MS: u64 = 100;
/// Maximum backend connect timeout in milliseconds.
pub(crate) const MAX_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Minimum backend request timeout in milliseconds.
pub(crate) const MIN_REQUEST_TIMEOUT_MS: u64 = 500;
/// Maximum backend request timeout in milliseconds.
pub(crate) const MAX_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Maximum retry backoff in milliseconds.
pub(crate) const MAX_RETRY_BACKOFF_MS: u64 = 5_000;
/// Maximum session TTL in seconds.
pub(crate) const MAX_SESSION_TTL_SECS: u64 = 86_400;
/// Maximum grace TTL in seconds.
pub(crate) const MAX_GRACE_TTL_SECS: u64 = 7 * 86_400;
/// Maximum tracked sessions or rate counters.
pub(crate) const MAX_TRACKED_ENTRIES: usize = 10_000_000;
/// Maximum usage buffer capacity.
pub(crate) const MAX_BUFFER_CAPACITY: usize = 1_000_000;
/// Maximum usage retention in days.
pub(crate) const MAX_RETENTION_DAYS: u32 = 3_650;
/// Smallest renderable code edge in pixels.
pub(crate) const MIN_PIXEL_SIZE: u32 = 21;
/// Largest renderable code edge in pixels.
pub(crate) const MAX_PIXEL_SIZE: u32 = 4_000;
/// Largest batch any tier may grant.
pub(crate) const MAX_BATCH_LIMIT: u32 = 100;
/// Minimum maintenance interval in seconds.
pub(crate) const MIN_MAINTENANCE_INTERVAL_SECS: u64 = 1;
/// Maximum maintenance interval in seconds.
pub(crate) const MAX_MAINTENANCE_INTERVAL_SECS: u64 = 86_400;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Top-level QR Gate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QrGateConfig {
    /// Deployment environment.
    #[serde(default)]
    pub environment: Environment,
    /// Key validation backend.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Session cache settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Webhook authentication settings.
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Usage ledger settings.
    #[serde(default)]
    pub usage: UsageConfig,
    /// Audit log settings.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Per-tier entitlement overrides.
    #[serde(default)]
    pub tiers: BTreeMap<Tier, TierOverride>,
}

impl QrGateConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.validate(self.environment)?;
        self.session.validate()?;
        self.rate_limit.validate()?;
        self.usage.validate()?;
        self.audit.validate()?;
        self.backend_secret()?;
        self.webhook_secret()?;
        self.tier_policy()?;
        Ok(())
    }

    /// Resolves the backend shared secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no acceptable secret is available.
    pub fn backend_secret(&self) -> Result<String, ConfigError> {
        resolve_secret(
            "backend",
            self.backend.secret.as_deref(),
            self.backend.secret_env.as_deref().unwrap_or(DEFAULT_BACKEND_SECRET_ENV),
            self.environment,
        )
    }

    /// Resolves the webhook secret, falling back to the backend secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no acceptable secret is available.
    pub fn webhook_secret(&self) -> Result<String, ConfigError> {
        let env_name = self.webhook.secret_env.as_deref().unwrap_or(DEFAULT_WEBHOOK_SECRET_ENV);
        if self.webhook.secret.is_some() || env::var(env_name).is_ok() {
            return resolve_secret(
                "webhook",
                self.webhook.secret.as_deref(),
                env_name,
                self.environment,
            );
        }
        self.backend_secret()
    }

    /// Returns true when the resolved backend secret is the development placeholder.
    #[must_use]
    pub fn uses_placeholder_secret(&self) -> bool {
        self.backend_secret().is_ok_and(|secret| secret == DEV_PLACEHOLDER_SECRET)
            || self.webhook_secret().is_ok_and(|secret| secret == DEV_PLACEHOLDER_SECRET)
    }

    /// Builds the tier policy from defaults plus overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an override is out of bounds.
    pub fn tier_policy(&self) -> Result<TierPolicy, ConfigError> {
        let mut entries = BTreeMap::new();
        for tier in Tier::ALL {
            let mut record = TierEntitlements::defaults_for(tier);
            if let Some(overrides) = self.tiers.get(&tier) {
                overrides.apply(tier, &mut record)?;
            }
            entries.insert(tier, record);
        }
        TierPolicy::from_map(entries).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Returns the decision engine settings.
    #[must_use]
    pub const fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            session_ttl: Duration::from_secs(self.session.ttl_secs),
            failure_policy: match self.backend.failure_policy {
                FailurePolicyConfig::FailClosed => FailurePolicy::FailClosed,
                FailurePolicyConfig::FailOpen => FailurePolicy::FailOpen {
                    grace: Duration::from_secs(self.session.grace_ttl_secs),
                },
            },
        }
    }

    /// Returns the validator settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the backend secret cannot be resolved.
    pub fn validator_config(&self) -> Result<ValidatorConfig, ConfigError> {
        let admin_secret = if self.backend.admin_keys { Some(self.backend_secret()?) } else { None };
        Ok(ValidatorConfig {
            request_timeout: Duration::from_millis(self.backend.request_timeout_ms),
            retry_backoff: Duration::from_millis(self.backend.retry_backoff_ms),
            admin_secret,
        })
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local development; placeholder secrets and plain HTTP are allowed.
    #[default]
    Development,
    /// Production; explicit secrets and HTTPS are required.
    Production,
}

/// Backend outage policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicyConfig {
    /// Deny when the backend cannot answer.
    #[default]
    FailClosed,
    /// Reuse last-known-good sessions within `session.grace_ttl_secs`.
    FailOpen,
}

/// Key validation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend base URL.
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Inline shared secret.
    #[serde(default)]
    pub secret: Option<String>,
    /// Environment variable holding the shared secret.
    #[serde(default)]
    pub secret_env: Option<String>,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-attempt request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Delay before the single retry in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Outage policy.
    #[serde(default)]
    pub failure_policy: FailurePolicyConfig,
    /// Whether internal admin keys are accepted.
    #[serde(default = "default_true")]
    pub admin_keys: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            secret: None,
            secret_env: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            failure_policy: FailurePolicyConfig::default(),
            admin_keys: true,
        }
    }
}

impl BackendConfig {
    /// Returns the URL without trailing slashes.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.url.trim().trim_end_matches('/')
    }

    /// Validates backend settings.
    fn validate(&self, environment: Environment) -> Result<(), ConfigError> {
        let url = self.base_url();
        if url.is_empty() || url.len() > MAX_URL_LENGTH {
            return Err(ConfigError::Invalid("backend.url must be set".to_string()));
        }
        let is_https = url.starts_with("https://");
        let is_http = url.starts_with("http://");
        if !is_https && !is_http {
            return Err(ConfigError::Invalid("backend.url must use http or https".to_string()));
        }
        if is_http && environment == Environment::Production {
            return Err(ConfigError::Invalid(
                "backend.url must use https in production".to_string(),
            ));
        }
        check_range(
            "backend.connect_timeout_ms",
            self.connect_timeout_ms,
            MIN_CONNECT_TIMEOUT_MS,
            MAX_CONNECT_TIMEOUT_MS,
        )?;
        check_range(
            "backend.request_timeout_ms",
            self.request_timeout_ms,
            MIN_REQUEST_TIMEOUT_MS,
            MAX_REQUEST_TIMEOUT_MS,
        )?;
        check_range("backend.retry_backoff_ms", self.retry_backoff_ms, 0, MAX_RETRY_BACKOFF_MS)?;
        if let Some(name) = &self.secret_env {
            validate_env_name("backend.secret_env", name)?;
        }
        Ok(())
    }
}

/// Session cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds a validation stays fresh.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Seconds a last-known-good session stays reusable under fail-open.
    #[serde(default = "default_grace_ttl_secs")]
    pub grace_ttl_secs: u64,
    /// Maximum cached sessions.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            grace_ttl_secs: default_grace_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl SessionConfig {
    /// Validates session settings.
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("session.ttl_secs", self.ttl_secs, 1, MAX_SESSION_TTL_SECS)?;
        check_range("session.grace_ttl_secs", self.grace_ttl_secs, 1, MAX_GRACE_TTL_SECS)?;
        if self.grace_ttl_secs < self.ttl_secs {
            return Err(ConfigError::Invalid(
                "session.grace_ttl_secs must be at least session.ttl_secs".to_string(),
            ));
        }
        check_entries("session.max_entries", self.max_entries)
    }

    /// Returns the retention horizon for last-known-good sessions.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.grace_ttl_secs)
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum tracked keys.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

impl RateLimitConfig {
    /// Validates rate limiter settings.
    fn validate(&self) -> Result<(), ConfigError> {
        check_entries("rate_limit.max_entries", self.max_entries)
    }
}

/// Webhook settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Inline shared secret (defaults to the backend secret).
    #[serde(default)]
    pub secret: Option<String>,
    /// Environment variable holding the shared secret.
    #[serde(default)]
    pub secret_env: Option<String>,
}

/// Usage ledger storage selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStoreKind {
    /// Process-local ledger.
    #[default]
    Memory,
    /// `SQLite` ledger at `usage.path`.
    Sqlite,
}

/// Usage ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Storage backend.
    #[serde(default)]
    pub store: UsageStoreKind,
    /// Database path for the `SQLite` store.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Queued entries before drops begin.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Days of usage kept by retention cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Seconds between maintenance passes.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            store: UsageStoreKind::default(),
            path: None,
            buffer_capacity: default_buffer_capacity(),
            retention_days: default_retention_days(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl UsageConfig {
    /// Validates usage settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.store, &self.path) {
            (UsageStoreKind::Sqlite, None) => {
                return Err(ConfigError::Invalid(
                    "usage.path is required for the sqlite store".to_string(),
                ));
            }
            (UsageStoreKind::Sqlite, Some(path)) => validate_path_string("usage.path", path)?,
            (UsageStoreKind::Memory, _) => {}
        }
        if self.buffer_capacity == 0 || self.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "usage.buffer_capacity must be between 1 and {MAX_BUFFER_CAPACITY}"
            )));
        }
        check_range(
            "usage.retention_days",
            u64::from(self.retention_days),
            1,
            u64::from(MAX_RETENTION_DAYS),
        )?;
        check_range(
            "usage.maintenance_interval_secs",
            self.maintenance_interval_secs,
            MIN_MAINTENANCE_INTERVAL_SECS,
            MAX_MAINTENANCE_INTERVAL_SECS,
        )
    }

    /// Returns the retention horizon.
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days).saturating_mul(86_400))
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit events are emitted.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// JSON-lines file; stderr when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl AuditConfig {
    /// Validates audit settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("audit.path", path)?;
        }
        Ok(())
    }
}

/// Partial entitlement override for one tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierOverride {
    /// Requests allowed per minute.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    /// Requests allowed per day.
    #[serde(default)]
    pub requests_per_day: Option<u32>,
    /// Largest output edge in pixels.
    #[serde(default)]
    pub max_pixel_size: Option<u32>,
    /// Largest batch size.
    #[serde(default)]
    pub batch_limit: Option<u32>,
    /// Replacement style set.
    #[serde(default)]
    pub allowed_styles: Option<Vec<String>>,
    /// Whether custom colours are allowed.
    #[serde(default)]
    pub custom_colors: Option<bool>,
    /// Queue priority hint.
    #[serde(default)]
    pub priority: Option<u32>,
}

impl TierOverride {
    /// Applies the override onto `record`.
    fn apply(&self, tier: Tier, record: &mut TierEntitlements) -> Result<(), ConfigError> {
        if let Some(value) = self.requests_per_minute {
            record.requests_per_minute = value;
        }
        if let Some(value) = self.requests_per_day {
            record.requests_per_day = value;
        }
        if let Some(value) = self.max_pixel_size {
            if !(MIN_PIXEL_SIZE ..= MAX_PIXEL_SIZE).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "tiers.{tier}.max_pixel_size must be between {MIN_PIXEL_SIZE} and \
                     {MAX_PIXEL_SIZE}"
                )));
            }
            record.max_pixel_size = value;
        }
        if let Some(value) = self.batch_limit {
            if value > MAX_BATCH_LIMIT {
                return Err(ConfigError::Invalid(format!(
                    "tiers.{tier}.batch_limit must be at most {MAX_BATCH_LIMIT}"
                )));
            }
            record.batch_limit = value;
        }
        if let Some(styles) = &self.allowed_styles {
            let mut normalized = BTreeSet::new();
            for style in styles {
                let style = style.trim().to_ascii_lowercase();
                if !is_valid_style_name(&style) {
                    return Err(ConfigError::Invalid(format!(
                        "tiers.{tier}.allowed_styles contains an invalid style name"
                    )));
                }
                normalized.insert(style);
            }
            record.allowed_styles = normalized;
        }
        if let Some(value) = self.custom_colors {
            record.custom_colors = value;
        }
        if let Some(value) = self.priority {
            record.priority = value;
        }
        if record.requests_per_minute > record.requests_per_day {
            return Err(ConfigError::Invalid(format!(
                "tiers.{tier}.requests_per_minute exceeds requests_per_day"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the caller or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a configured path against length constraints.
fn validate_path_string(field: &str, path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates an environment variable name.
fn validate_env_name(field: &str, name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name.bytes().all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{field} must be an uppercase environment variable name")))
    }
}

/// Resolves a secret from inline config, then the environment, then the
/// development placeholder.
fn resolve_secret(
    label: &str,
    inline: Option<&str>,
    env_name: &str,
    environment: Environment,
) -> Result<String, ConfigError> {
    let secret = match inline {
        Some(value) => value.to_string(),
        None => match env::var(env_name) {
            Ok(value) => value,
            Err(_) if environment == Environment::Development => {
                return Ok(DEV_PLACEHOLDER_SECRET.to_string());
            }
            Err(_) => {
                return Err(ConfigError::Invalid(format!(
                    "{label} secret must be set in production (inline or via {env_name})"
                )));
            }
        },
    };
    if environment == Environment::Production && secret == DEV_PLACEHOLDER_SECRET {
        return Err(ConfigError::Invalid(format!(
            "{label} secret must not be the development placeholder in production"
        )));
    }
    if secret.len() < MIN_SECRET_BYTES || secret.len() > MAX_SECRET_BYTES {
        return Err(ConfigError::Invalid(format!(
            "{label} secret must be between {MIN_SECRET_BYTES} and {MAX_SECRET_BYTES} bytes"
        )));
    }
    Ok(secret)
}

/// Checks an inclusive numeric range.
fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!("{field} must be between {min} and {max}")));
    }
    Ok(())
}

/// Checks an entry bound.
fn check_entries(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_TRACKED_ENTRIES {
        return Err(ConfigError::Invalid(format!(
            "{field} must be between 1 and {MAX_TRACKED_ENTRIES}"
        )));
    }
    Ok(())
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default backend URL.
pub(crate) fn default_backend_url() -> String {
    "http://localhost:8069".to_string()
}

/// Default backend connect timeout.
pub(crate) const fn default_connect_timeout_ms() -> u64 {
    2_000
}

/// Default backend request timeout.
pub(crate) const fn default_request_timeout_ms() -> u64 {
    5_000
}

/// Default retry backoff.
pub(crate) const fn default_retry_backoff_ms() -> u64 {
    200
}

/// Default session TTL.
pub(crate) const fn default_session_ttl_secs() -> u64 {
    300
}

/// Default grace TTL.
pub(crate) const fn default_grace_ttl_secs() -> u64 {
    3_600
}

/// Default bound for sessions and rate counters.
pub(crate) const fn default_max_entries() -> usize {
    100_000
}

/// Default usage buffer capacity.
pub(crate) const fn default_buffer_capacity() -> usize {
    4_096
}

/// Default usage retention.
pub(crate) const fn default_retention_days() -> u32 {
    30
}

/// Default maintenance interval.
pub(crate) const fn default_maintenance_interval_secs() -> u64 {
    60
}

/// Serde helper for `true` defaults.
pub(crate) const fn default_true() -> bool {
    true
}
