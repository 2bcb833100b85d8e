//! Settings validation tests for qrgate-config.
// crates/qrgate-config/tests/settings_validation.rs
// =============================================================================
// Module: Config Settings Validation Tests
// Description: Validate bounds, secrets, tier overrides, and conversions.
// Purpose: Ensure invalid settings fail closed and valid ones map correctly.
// =============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

use std::time::Duration;

use qrgate_config::ConfigError;
use qrgate_config::DEV_PLACEHOLDER_SECRET;
use qrgate_config::QrGateConfig;
use qrgate_config::config_toml_example;
use qrgate_core::FailurePolicy;
use qrgate_core::Tier;

/// Secret long enough to pass validation.
const SECRET: &str = "settings-test-secret-0001";

/// Parses TOML and returns the validation error message.
fn invalid(content: &str) -> String {
    match QrGateConfig::from_toml_str(content) {
        Err(ConfigError::Invalid(message)) => message,
        Err(other) => panic!("expected invalid config, got {other}"),
        Ok(_) => panic!("expected invalid config"),
    }
}

// ============================================================================
// SECTION: Secrets
// ============================================================================

#[test]
fn development_falls_back_to_placeholder_secret() {
    let config = QrGateConfig::from_toml_str(
        "[backend]\nsecret_env = \"QRGATE_TEST_UNSET_BACKEND_SECRET\"\n[webhook]\nsecret_env = \
         \"QRGATE_TEST_UNSET_WEBHOOK_SECRET\"\n",
    )
    .unwrap();
    assert_eq!(config.backend_secret().unwrap(), DEV_PLACEHOLDER_SECRET);
    assert_eq!(config.webhook_secret().unwrap(), DEV_PLACEHOLDER_SECRET);
    assert!(config.uses_placeholder_secret());
}

#[test]
fn production_requires_explicit_secret() {
    let message = invalid(
        "environment = \"production\"\n[backend]\nurl = \"https://app.example.com\"\nsecret_env = \
         \"QRGATE_TEST_UNSET_BACKEND_SECRET\"\n",
    );
    assert!(message.contains("must be set in production"));
}

#[test]
fn production_rejects_placeholder_secret() {
    let message = invalid(&format!(
        "environment = \"production\"\n[backend]\nurl = \"https://app.example.com\"\nsecret = \
         \"{DEV_PLACEHOLDER_SECRET}\"\n"
    ));
    assert!(message.contains("development placeholder"));
}

#[test]
fn production_rejects_plain_http_backend() {
    let message = invalid(&format!(
        "environment = \"production\"\n[backend]\nurl = \"http://app.example.com\"\nsecret = \
         \"{SECRET}\"\n"
    ));
    assert!(message.contains("https"));
}

#[test]
fn short_secrets_are_rejected() {
    let message = invalid("[backend]\nsecret = \"short\"\n");
    assert!(message.contains("backend secret must be between"));
}

#[test]
fn webhook_secret_defaults_to_backend_secret() {
    let config = QrGateConfig::from_toml_str(&format!(
        "[backend]\nsecret = \"{SECRET}\"\n[webhook]\nsecret_env = \
         \"QRGATE_TEST_UNSET_WEBHOOK_SECRET\"\n"
    ))
    .unwrap();
    assert_eq!(config.webhook_secret().unwrap(), SECRET);
    assert!(!config.uses_placeholder_secret());
}

#[test]
fn webhook_secret_can_differ() {
    let config = QrGateConfig::from_toml_str(&format!(
        "[backend]\nsecret = \"{SECRET}\"\n[webhook]\nsecret = \"separate-webhook-secret-01\"\n"
    ))
    .unwrap();
    assert_eq!(config.webhook_secret().unwrap(), "separate-webhook-secret-01");
}

#[test]
fn secret_env_names_must_be_uppercase() {
    let message = invalid("[backend]\nsecret_env = \"lower-case\"\n");
    assert!(message.contains("backend.secret_env"));
}

// ============================================================================
// SECTION: Bounds
// ============================================================================

#[test]
fn backend_timeouts_are_bounded() {
    assert!(invalid("[backend]\nconnect_timeout_ms = 50\n").contains("connect_timeout_ms"));
    assert!(invalid("[backend]\nrequest_timeout_ms = 60000\n").contains("request_timeout_ms"));
}

#[test]
fn grace_must_cover_session_ttl() {
    let message = invalid("[session]\nttl_secs = 600\ngrace_ttl_secs = 300\n");
    assert!(message.contains("grace_ttl_secs must be at least"));
}

#[test]
fn zero_entry_bounds_are_rejected() {
    assert!(invalid("[session]\nmax_entries = 0\n").contains("session.max_entries"));
    assert!(invalid("[rate_limit]\nmax_entries = 0\n").contains("rate_limit.max_entries"));
}

#[test]
fn sqlite_store_requires_path() {
    assert!(invalid("[usage]\nstore = \"sqlite\"\n").contains("usage.path"));
}

#[test]
fn retention_must_be_at_least_one_day() {
    assert!(invalid("[usage]\nretention_days = 0\n").contains("usage.retention_days"));
}

// ============================================================================
// SECTION: Tier Overrides
// ============================================================================

#[test]
fn tier_overrides_apply_on_top_of_defaults() {
    let config = QrGateConfig::from_toml_str(
        "[tiers.pro]\nrequests_per_minute = 45\nallowed_styles = [\"Basic\", \"logo\"]\n",
    )
    .unwrap();
    let policy = config.tier_policy().unwrap();
    let pro = policy.entitlements(Tier::Pro);
    assert_eq!(pro.requests_per_minute, 45);
    assert_eq!(pro.requests_per_day, 500);
    assert!(pro.allows_style("basic"));
    assert!(!pro.allows_style("artistic"));
    assert_eq!(policy.entitlements(Tier::Free).requests_per_minute, 5);
}

#[test]
fn tier_overrides_are_bounded() {
    assert!(invalid("[tiers.business]\nmax_pixel_size = 5000\n").contains("max_pixel_size"));
    assert!(invalid("[tiers.business]\nmax_pixel_size = 20\n").contains("max_pixel_size"));
    assert!(invalid("[tiers.admin]\nbatch_limit = 101\n").contains("batch_limit"));
    assert!(invalid("[tiers.free]\nrequests_per_minute = 11\n").contains("exceeds requests_per_day"));
    assert!(invalid("[tiers.pro]\nallowed_styles = [\"bad style\"]\n").contains("invalid style"));
}

#[test]
fn unknown_tier_names_fail_to_parse() {
    let result = QrGateConfig::from_toml_str("[tiers.platinum]\nbatch_limit = 5\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

#[test]
fn engine_and_validator_settings_follow_config() {
    let config = QrGateConfig::from_toml_str(&format!(
        "[backend]\nsecret = \"{SECRET}\"\nfailure_policy = \"fail_open\"\nrequest_timeout_ms = \
         1500\nretry_backoff_ms = 50\n[session]\nttl_secs = 120\ngrace_ttl_secs = 900\n"
    ))
    .unwrap();
    let engine = config.engine_config();
    assert_eq!(engine.session_ttl, Duration::from_secs(120));
    assert_eq!(engine.failure_policy, FailurePolicy::FailOpen {
        grace: Duration::from_secs(900)
    });

    let validator = config.validator_config().unwrap();
    assert_eq!(validator.request_timeout, Duration::from_millis(1_500));
    assert_eq!(validator.retry_backoff, Duration::from_millis(50));
    assert_eq!(validator.admin_secret.as_deref(), Some(SECRET));
}

#[test]
fn admin_keys_can_be_disabled() {
    let config = QrGateConfig::from_toml_str(&format!(
        "[backend]\nsecret = \"{SECRET}\"\nadmin_keys = false\n"
    ))
    .unwrap();
    assert!(config.validator_config().unwrap().admin_secret.is_none());
}

#[test]
fn example_config_is_valid_once_secrets_are_supplied() {
    let mut config: QrGateConfig = toml::from_str(&config_toml_example()).unwrap();
    config.backend.secret = Some(SECRET.to_string());
    config.webhook.secret = Some("example-webhook-secret-01".to_string());
    config.validate().unwrap();
    assert_eq!(config.tier_policy().unwrap().entitlements(Tier::Pro).max_pixel_size, 2_500);
    assert_eq!(config.usage.retention(), Duration::from_secs(30 * 86_400));
}
