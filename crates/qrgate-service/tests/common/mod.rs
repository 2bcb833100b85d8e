// crates/qrgate-service/tests/common/mod.rs
// ============================================================================
// Module: Common Service Test Fixtures
// Description: Mock account backend over tiny_http and config builders.
// Purpose: Exercise the HTTP key backend and gate assembly end to end.
// Dependencies: qrgate-config, qrgate-core, tiny_http, serde_json
// ============================================================================

//! ## Overview
//! [`MockBackend`] serves the key validation endpoint on an ephemeral port
//! and records every request it receives. Responses are scripted per API key.

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
use std::io::Cursor;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use qrgate_config::QrGateConfig;
use tiny_http::Response;
use tiny_http::Server;
use tiny_http::StatusCode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Backend secret shared by the mock and the gate.
pub const BACKEND_SECRET: &str = "service-test-backend-secret";
/// Key the mock answers slowly, past the client timeout.
pub const SLOW_KEY: &str = "slow-key";
/// Keys with this prefix are answered with chunked encoding and no length.
pub const CHUNKED_PREFIX: &str = "chunked-";

// ============================================================================
// SECTION: Mock Backend
// ============================================================================

/// One request seen by the mock.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// Request path.
    pub path: String,
    /// `Authorization` header, if any.
    pub authorization: Option<String>,
    /// Raw request body.
    pub body: String,
}

/// Scripted account backend.
pub struct MockBackend {
    /// Base URL of the server.
    pub url: String,
    /// Underlying server.
    server: Arc<Server>,
    /// Serving thread.
    worker: Option<JoinHandle<()>>,
    /// Captured requests.
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockBackend {
    /// Starts a server answering `routes` (api key -> status, body); unknown
    /// keys get a 404. Keys starting with [`CHUNKED_PREFIX`] are streamed
    /// without a content length.
    pub fn start(routes: &[(&str, u16, &str)]) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let routes: HashMap<String, (u16, String)> = routes
            .iter()
            .map(|(key, status, body)| ((*key).to_string(), (*status, (*body).to_string())))
            .collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = {
            let server = Arc::clone(&server);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for mut request in server.incoming_requests() {
                    let mut body = String::new();
                    let _ = request.as_reader().read_to_string(&mut body);
                    let authorization = request
                        .headers()
                        .iter()
                        .find(|header| header.field.equiv("Authorization"))
                        .map(|header| header.value.to_string());
                    seen.lock().unwrap().push(SeenRequest {
                        path: request.url().to_string(),
                        authorization,
                        body: body.clone(),
                    });
                    let api_key = serde_json::from_str::<serde_json::Value>(&body)
                        .ok()
                        .and_then(|value| value["api_key"].as_str().map(ToString::to_string))
                        .unwrap_or_default();
                    if api_key == SLOW_KEY {
                        thread::sleep(Duration::from_millis(1_500));
                    }
                    let (status, payload) =
                        routes.get(&api_key).cloned().unwrap_or((404, String::new()));
                    if api_key.starts_with(CHUNKED_PREFIX) {
                        let reader = Cursor::new(payload.into_bytes());
                        let response =
                            Response::new(StatusCode(status), Vec::new(), reader, None, None);
                        let _ = request.respond(response);
                    } else {
                        let _ = request
                            .respond(Response::from_string(payload).with_status_code(status));
                    }
                }
            })
        };
        Self {
            url: format!("http://{addr}"),
            server,
            worker: Some(worker),
            seen,
        }
    }

    /// Returns the captured requests.
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Returns a URL nothing is listening on.
pub fn dead_url() -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    drop(server);
    format!("http://{addr}")
}

/// Builds a backend answer body.
pub fn valid_body(user_id: &str, tier: &str) -> String {
    serde_json::json!({"valid": true, "user_id": user_id, "tier": tier}).to_string()
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Builds a development config pointing at `url` with `extra` TOML appended.
pub fn config_for(url: &str, extra: &str) -> QrGateConfig {
    QrGateConfig::from_toml_str(&format!(
        "[backend]\nurl = \"{url}\"\nsecret = \"{BACKEND_SECRET}\"\nrequest_timeout_ms = \
         1000\nretry_backoff_ms = 10\n{extra}"
    ))
    .unwrap()
}
