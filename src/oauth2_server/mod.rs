// ABOUTME: OAuth 2.1 authorization server embedded in the CRM
// ABOUTME: RFC 7591 client registration, PKCE code flow, and rotating refresh tokens
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

/// RFC 7591 dynamic client registration implementation
pub mod client_registration;
/// Authorization and token endpoint logic
pub mod endpoints;
/// OAuth 2.1 data models and types
pub mod models;
/// PKCE (RFC 7636) challenge and verifier handling
pub mod pkce;
/// HTTP route handlers
pub mod routes;

/// RFC 7591 client registration management
pub use client_registration::ClientRegistrationManager;

/// OAuth 2.1 authorization server
pub use endpoints::OAuth2AuthorizationServer;

/// Client registration request
pub use models::ClientRegistrationRequest;
/// Client registration response
pub use models::ClientRegistrationResponse;
/// OAuth 2.1 error response
pub use models::OAuth2Error;
/// Token exchange request
pub use models::TokenRequest;
/// Token exchange response
pub use models::TokenResponse;

/// HTTP routes for the authorization server
pub use routes::OAuth2ServerRoutes;
