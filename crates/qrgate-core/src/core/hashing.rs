// crates/qrgate-core/src/core/hashing.rs
// ============================================================================
// Module: QR Gate Hashing + Secret Comparison
// Description: SHA-256 fingerprints and constant-time comparison helpers.
// Purpose: Keep raw API keys and secrets out of logs and timing channels.
// Dependencies: sha2, subtle
// ============================================================================

//! ## Overview
//! API keys are recorded and logged only as SHA-256 fingerprints. Secret
//! comparison hashes both sides first so the compared inputs always have the
//! same length, then compares digests with [`subtle`].
//!
//! Security posture: a mismatch at any position, or a length mismatch, takes
//! the same time to reject.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of hex characters kept for log-safe key fingerprints.
pub const FINGERPRINT_HEX_CHARS: usize = 12;

// ============================================================================
// SECTION: Digests
// ============================================================================

/// Returns the raw SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Returns the lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex_encode(&sha256(bytes))
}

/// Returns the full SHA-256 hex digest of an API key for ledger storage.
#[must_use]
pub fn api_key_hash(api_key: &str) -> String {
    sha256_hex(api_key.as_bytes())
}

/// Returns a short, log-safe fingerprint of an API key.
#[must_use]
pub fn key_fingerprint(api_key: &str) -> String {
    let mut digest = api_key_hash(api_key);
    digest.truncate(FINGERPRINT_HEX_CHARS);
    digest
}

// ============================================================================
// SECTION: Constant-Time Comparisons
// ============================================================================

/// Compares two secrets without leaking content or length through timing.
#[must_use]
pub fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    let presented = sha256(presented);
    let expected = sha256(expected);
    presented.ct_eq(&expected).into()
}

/// Compares two equal-purpose strings in constant time over their digests.
#[must_use]
pub fn secrets_match_str(presented: &str, expected: &str) -> bool {
    secrets_match(presented.as_bytes(), expected.as_bytes())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Encodes bytes as lowercase hex.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================
