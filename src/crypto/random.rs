// ABOUTME: Secure random token material generation for codes and refresh tokens
// ABOUTME: Wraps the system RNG with hex and base64url encodings used on the wire
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! Secure random token material.
//!
//! All protocol token entropy comes through here: authorization codes
//! (32 random bytes, hex-encoded so they survive URL query embedding
//! unescaped) and raw refresh tokens (32 random bytes, base64url without
//! padding). A failing system RNG is a fatal security condition, never
//! silently degraded.

use crate::errors::{AppError, AppResult};
use base64::{engine::general_purpose, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};

/// Fill a buffer from the system RNG
///
/// # Errors
/// Returns an error if the system RNG fails - the server cannot operate
/// securely without working RNG
fn fill_random(bytes: &mut [u8]) -> AppResult<()> {
    let rng = SystemRandom::new();
    rng.fill(bytes).map_err(|e| {
        tracing::error!(
            "CRITICAL: SystemRandom failed - cannot generate secure random bytes: {}",
            e
        );
        AppError::internal("System RNG failure - server cannot operate securely")
    })
}

/// Generate an authorization code: 32 random bytes as 64 lowercase hex chars
///
/// # Errors
/// Returns an error if the system RNG fails
pub fn generate_authorization_code() -> AppResult<String> {
    let mut bytes = [0u8; 32];
    fill_random(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Generate a raw refresh token: 32 random bytes, base64url without padding
///
/// # Errors
/// Returns an error if the system RNG fails
pub fn generate_refresh_token() -> AppResult<String> {
    let mut bytes = [0u8; 32];
    fill_random(&mut bytes)?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
