// crates/qrgate-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example for QR Gate configuration. The example is validated by
//! the crate tests so it never drifts from the model.

/// Returns a canonical example `qrgate.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"environment = "production"

[backend]
url = "https://app.example.com"
secret_env = "QRGATE_BACKEND_SECRET"
connect_timeout_ms = 2000
request_timeout_ms = 5000
retry_backoff_ms = 200
failure_policy = "fail_open"
admin_keys = true

[session]
ttl_secs = 300
grace_ttl_secs = 3600
max_entries = 100000

[rate_limit]
max_entries = 100000

[webhook]
secret_env = "QRGATE_WEBHOOK_SECRET"

[usage]
store = "sqlite"
path = "qrgate-usage.db"
buffer_capacity = 4096
retention_days = 30
maintenance_interval_secs = 60

[audit]
enabled = true
path = "qrgate-audit.jsonl"

[tiers.pro]
requests_per_minute = 40
max_pixel_size = 2500

[tiers.free]
allowed_styles = ["basic", "text"]
"#,
    )
}
