// crates/qrgate-service/src/backend.rs
// ============================================================================
// Module: HTTP Key Backend
// Description: KeyBackend that validates API keys against the account service.
// Purpose: Map backend HTTP responses onto valid, invalid, or unavailable.
// Dependencies: qrgate-core, reqwest, serde, serde_json
// ============================================================================

//! ## Overview
//! Posts `{"api_key": ...}` to `{base_url}/api/qr-builder/validate-key` with
//! a bearer secret. A 200 answer with `valid = true` yields an identity; an
//! explicit refusal (200 with `valid = false`, 401, 403, 404) is terminal;
//! everything else is reported as unavailable so the outage policy applies.
//!
//! Security posture: backend responses are untrusted and size-limited; the
//! body is read chunk by chunk and abandoned once it passes the limit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use qrgate_core::BackendError;
use qrgate_core::BackendVerdict;
use qrgate_core::Identity;
use qrgate_core::KeyBackend;
use qrgate_core::Tier;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Validation endpoint path relative to the backend base URL.
pub const VALIDATE_KEY_PATH: &str = "/api/qr-builder/validate-key";
/// Maximum accepted response body.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Request body.
#[derive(Serialize)]
struct ValidationRequest<'a> {
    /// Presented API key.
    api_key: &'a str,
}

/// Response body.
#[derive(Deserialize)]
struct ValidationResponse {
    /// Whether the key is active.
    #[serde(default)]
    valid: bool,
    /// Owning user.
    #[serde(default)]
    user_id: Option<String>,
    /// Tier name; absent means free.
    #[serde(default)]
    tier: Option<String>,
    /// Account email.
    #[serde(default)]
    email: Option<String>,
}

impl ValidationResponse {
    /// Converts the body into a verdict.
    fn into_verdict(self) -> Result<BackendVerdict, BackendError> {
        if !self.valid {
            return Ok(BackendVerdict::Invalid);
        }
        let user_id = self
            .user_id
            .filter(|value| !value.is_empty())
            .ok_or_else(|| BackendError::Unavailable("backend response missing user_id".to_string()))?;
        let tier = match self.tier.as_deref() {
            None => Tier::Free,
            Some(name) => Tier::parse(name).ok_or_else(|| {
                BackendError::Unavailable("backend response has unknown tier".to_string())
            })?,
        };
        let mut identity = Identity::new(user_id, tier);
        identity.email = self.email;
        Ok(BackendVerdict::Valid(identity))
    }
}

// ============================================================================
// SECTION: Backend
// ============================================================================

/// HTTP-backed key validator.
///
/// # Invariants
/// - `endpoint` is the normalized base URL joined with [`VALIDATE_KEY_PATH`].
pub struct HttpKeyBackend {
    /// Full validation URL.
    endpoint: String,
    /// Prebuilt `Authorization` header value.
    authorization: HeaderValue,
    /// HTTP client configured with timeouts.
    client: Client,
}

impl HttpKeyBackend {
    /// Builds a backend client.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unavailable`] when the secret is not a valid
    /// header value or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        secret: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        let mut authorization = HeaderValue::from_str(&format!("Bearer {secret}"))
            .map_err(|_| BackendError::Unavailable("invalid backend secret".to_string()))?;
        authorization.set_sensitive(true);
        Ok(Self {
            endpoint: format!("{}{VALIDATE_KEY_PATH}", base_url.trim_end_matches('/')),
            authorization,
            client,
        })
    }

    /// Returns the validation URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl KeyBackend for HttpKeyBackend {
    async fn validate(&self, api_key: &str) -> Result<BackendVerdict, BackendError> {
        let mut response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, self.authorization.clone())
            .json(&ValidationRequest {
                api_key,
            })
            .send()
            .await
            .map_err(map_transport_error)?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                return Ok(BackendVerdict::Invalid);
            }
            status => {
                return Err(BackendError::Unavailable(format!("backend status {status}")));
            }
        }
        let declared = response.content_length().and_then(|len| usize::try_from(len).ok());
        if declared.is_some_and(|len| len > MAX_RESPONSE_BYTES) {
            return Err(BackendError::Unavailable("backend response too large".to_string()));
        }
        let mut body = Vec::with_capacity(declared.unwrap_or(0));
        while let Some(chunk) = response.chunk().await.map_err(map_transport_error)? {
            if body.len().saturating_add(chunk.len()) > MAX_RESPONSE_BYTES {
                return Err(BackendError::Unavailable("backend response too large".to_string()));
            }
            body.extend_from_slice(&chunk);
        }
        let parsed: ValidationResponse = serde_json::from_slice(&body)
            .map_err(|_| BackendError::Unavailable("malformed backend response".to_string()))?;
        parsed.into_verdict()
    }
}

/// Maps a transport failure onto the backend error taxonomy.
fn map_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Unavailable(err.to_string())
    }
}
