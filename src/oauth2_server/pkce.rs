// ABOUTME: PKCE (RFC 7636) challenge validation and S256 verifier proof
// ABOUTME: Only the S256 method is supported; comparison is constant-time
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! Proof Key for Code Exchange.
//!
//! Every authorization request must carry an S256 code challenge, and every
//! code exchange must present the matching verifier. The `plain` method is
//! rejected outright per OAuth 2.1.

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Minimum verifier length per RFC 7636
const MIN_VERIFIER_LENGTH: usize = 43;
/// Maximum verifier length per RFC 7636
const MAX_VERIFIER_LENGTH: usize = 128;

/// Check that a code verifier matches the RFC 7636 format: 43-128 chars
/// drawn from `[A-Za-z0-9\-._~]`
#[must_use]
pub fn is_valid_verifier_format(verifier: &str) -> bool {
    if verifier.len() < MIN_VERIFIER_LENGTH || verifier.len() > MAX_VERIFIER_LENGTH {
        return false;
    }
    verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// Check that a code challenge looks like a base64url-encoded SHA-256 digest
#[must_use]
pub fn is_valid_challenge_format(challenge: &str) -> bool {
    // 32 digest bytes encode to exactly 43 base64url chars without padding
    challenge.len() == 43
        && challenge
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

/// Compute the S256 challenge for a verifier: `BASE64URL(SHA256(verifier))`
#[must_use]
pub fn compute_s256_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Verify a code verifier against the stored S256 challenge.
///
/// The derived challenge is compared in constant time; a malformed verifier
/// fails without touching the digest.
#[must_use]
pub fn verify_s256(verifier: &str, stored_challenge: &str) -> bool {
    if !is_valid_verifier_format(verifier) {
        return false;
    }
    let derived = compute_s256_challenge(verifier);
    derived.as_bytes().ct_eq(stored_challenge.as_bytes()).into()
}
