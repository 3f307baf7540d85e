// ABOUTME: Cryptographic utilities for the authorization server
// ABOUTME: Secure random token material generation backed by the system RNG
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! Cryptographic utilities.
//!
//! Token material generation only; digests and signatures live with their
//! consumers (`oauth2_server::pkce`, `auth`).

/// Secure random token material generation
pub mod random;
