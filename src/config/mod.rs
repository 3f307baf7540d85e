// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Handles environment-driven configuration for ports, database, tokens and issuer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Meridian CRM

//! Configuration module for the Meridian CRM server
//!
//! Everything is environment-driven; `ServerConfig::from_env()` is the single
//! entry point the binary uses. Tests construct configurations directly.

/// Environment and server configuration
pub mod environment;
