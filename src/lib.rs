// ABOUTME: Main library entry point for the Meridian CRM authorization server
// ABOUTME: Provides the embedded OAuth 2.1 authorization-code + PKCE flow for external clients
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Meridian CRM

#![deny(unsafe_code)]

//! # Meridian CRM Authorization Server
//!
//! The embedded OAuth 2.1 authorization server of the Meridian multi-tenant
//! sales CRM. External tool-calling clients (for example an MCP-based agent)
//! obtain CRM access tokens through a standard authorization-code + PKCE flow:
//!
//! 1. the client registers itself (`POST /oauth/register`, RFC 7591),
//! 2. the user authenticates and approves access through server-rendered
//!    login and consent pages (`/oauth/authorize`),
//! 3. the client exchanges the resulting single-use authorization code for an
//!    access token and a rotating refresh token (`POST /oauth/token`).
//!
//! Only public clients are supported (no client secrets); possession is
//! proven with PKCE (`S256`) and exact-match redirect URIs. Refresh tokens
//! are stored hashed and rotated on every use.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meridian_crm_server::config::environment::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = ServerConfig::from_env()?;
//!
//!     println!("Meridian CRM server configured with port: HTTP={}",
//!              config.http_port);
//!
//!     Ok(())
//! }
//! ```

// ── Public API ──────────────────────────────────────────────────────────
// These modules are used by the server binary (src/bin/) and integration
// tests (tests/). They must remain `pub` so external consumers can access them.

/// Authentication, credential verification and signed-token management
pub mod auth;

/// Configuration management from environment variables
pub mod config;

/// Cryptographic utilities for token material generation
pub mod crypto;

/// Multi-tenant database access and migrations
pub mod database;

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Production logging and structured output
pub mod logging;

/// Common data models shared across the CRM
pub mod models;

/// OAuth 2.1 authorization server (Meridian as provider for external clients)
pub mod oauth2_server;

/// Shared `HTTP` routes (health, router assembly)
pub mod routes;
