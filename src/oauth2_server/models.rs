// ABOUTME: OAuth 2.1 data models for client registration, authorization, and token exchange
// ABOUTME: Implements RFC 7591 and RFC 6749 request/response structures plus persistence records
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization code lifetime in seconds (5 minutes)
pub const AUTH_CODE_EXPIRY_SECS: i64 = 300;

/// Refresh token lifetime in days
pub const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 7;

/// Scope granted when a client requests none
pub const DEFAULT_SCOPE: &str = "crm:read crm:write";

/// Grant types every registered client receives
pub const SUPPORTED_GRANT_TYPES: [&str; 2] = ["authorization_code", "refresh_token"];

/// OAuth 2.0 Client Registration Request (RFC 7591)
#[derive(Debug, Deserialize)]
pub struct ClientRegistrationRequest {
    /// Human-readable client name for the consent screen
    pub client_name: String,
    /// Redirect URIs for the authorization code flow
    pub redirect_uris: Vec<String>,
    /// Grant types the client intends to use
    pub grant_types: Option<Vec<String>>,
    /// Token endpoint authentication method (only "none" is accepted;
    /// all clients are public)
    pub token_endpoint_auth_method: Option<String>,
}

/// OAuth 2.0 Client Registration Response (RFC 7591)
#[derive(Debug, Serialize)]
pub struct ClientRegistrationResponse {
    /// Unique client identifier
    pub client_id: String,
    /// Client name as registered
    pub client_name: String,
    /// Redirect URIs registered for this client
    pub redirect_uris: Vec<String>,
    /// Grant types allowed for this client
    pub grant_types: Vec<String>,
    /// Always "none" - public clients carry no secret
    pub token_endpoint_auth_method: String,
}

/// OAuth 2.0 Authorization Request query parameters
///
/// All fields optional at the extraction layer so that a malformed request
/// renders an error page instead of an axum rejection.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthorizeQuery {
    /// Response type (must be "code")
    pub response_type: Option<String>,
    /// Client identifier
    pub client_id: Option<String>,
    /// Redirect URI for the response
    pub redirect_uri: Option<String>,
    /// Requested scopes (space-separated)
    pub scope: Option<String>,
    /// State parameter for CSRF protection, echoed back verbatim
    pub state: Option<String>,
    /// PKCE code challenge (RFC 7636)
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (must be "S256")
    pub code_challenge_method: Option<String>,
}

/// Login form submission from the authorization page
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    /// User email
    pub email: String,
    /// User password
    pub password: String,
    /// Client identifier carried through the flow
    pub client_id: String,
    /// Redirect URI carried through the flow
    pub redirect_uri: String,
    /// Requested scopes carried through the flow
    pub scope: Option<String>,
    /// State parameter carried through the flow
    pub state: Option<String>,
    /// PKCE code challenge carried through the flow
    pub code_challenge: String,
    /// PKCE code challenge method carried through the flow
    pub code_challenge_method: String,
}

/// Consent form submission from the consent page
#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    /// Short-lived token proving the user authenticated moments ago
    pub auth_session_token: String,
    /// Client identifier carried through the flow
    pub client_id: String,
    /// Redirect URI carried through the flow
    pub redirect_uri: String,
    /// Requested scopes carried through the flow
    pub scope: Option<String>,
    /// State parameter carried through the flow
    pub state: Option<String>,
    /// PKCE code challenge carried through the flow
    pub code_challenge: String,
    /// PKCE code challenge method carried through the flow
    pub code_challenge_method: String,
    /// "allow" or "deny"
    pub decision: String,
}

/// OAuth 2.0 Token Request (form-encoded)
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Grant type (`authorization_code` or `refresh_token`)
    pub grant_type: String,
    /// Authorization code (for `authorization_code` grant)
    pub code: Option<String>,
    /// Redirect URI (must match the one used at authorization)
    pub redirect_uri: Option<String>,
    /// Client ID
    pub client_id: Option<String>,
    /// PKCE code verifier (for `authorization_code` grant)
    pub code_verifier: Option<String>,
    /// Refresh token (for `refresh_token` grant)
    pub refresh_token: Option<String>,
}

/// OAuth 2.0 Token Response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token (JWT)
    pub access_token: String,
    /// Token type (always "bearer")
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Rotating refresh token
    pub refresh_token: String,
    /// Granted scopes (space-separated)
    pub scope: String,
}

/// OAuth 2.0 Error Response (RFC 6749 Section 5.2)
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuth2Error {
    /// Error code
    pub error: String,
    /// Human-readable error description
    pub error_description: Option<String>,
    /// URI for error information
    pub error_uri: Option<String>,
}

impl OAuth2Error {
    /// Create an `invalid_request` error
    #[must_use]
    pub fn invalid_request(description: &str) -> Self {
        Self {
            error: "invalid_request".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: Some(
                "https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1".to_owned(),
            ),
        }
    }

    /// Create an `invalid_client` error
    #[must_use]
    pub fn invalid_client(description: &str) -> Self {
        Self {
            error: "invalid_client".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: Some("https://datatracker.ietf.org/doc/html/rfc6749#section-5.2".to_owned()),
        }
    }

    /// Create an `invalid_grant` error
    #[must_use]
    pub fn invalid_grant(description: &str) -> Self {
        Self {
            error: "invalid_grant".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: Some("https://datatracker.ietf.org/doc/html/rfc6749#section-5.2".to_owned()),
        }
    }

    /// Create an `unsupported_grant_type` error
    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self {
            error: "unsupported_grant_type".to_owned(),
            error_description: Some("Grant type not supported".to_owned()),
            error_uri: Some("https://datatracker.ietf.org/doc/html/rfc6749#section-5.2".to_owned()),
        }
    }

    /// Create an `invalid_client_metadata` error (RFC 7591 Section 3.2.2)
    #[must_use]
    pub fn invalid_client_metadata(description: &str) -> Self {
        Self {
            error: "invalid_client_metadata".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: Some(
                "https://datatracker.ietf.org/doc/html/rfc7591#section-3.2.2".to_owned(),
            ),
        }
    }

    /// Create an `access_denied` error
    #[must_use]
    pub fn access_denied() -> Self {
        Self {
            error: "access_denied".to_owned(),
            error_description: Some("The resource owner denied the request".to_owned()),
            error_uri: Some(
                "https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1".to_owned(),
            ),
        }
    }

    /// Create a `server_error` error
    #[must_use]
    pub fn server_error() -> Self {
        Self {
            error: "server_error".to_owned(),
            error_description: Some("The authorization server encountered an error".to_owned()),
            error_uri: None,
        }
    }
}

/// Registered OAuth 2.1 client (persistence record)
#[derive(Debug, Clone)]
pub struct OAuth2Client {
    /// Unique client identifier (`crm_client_` prefix)
    pub client_id: String,
    /// Human-readable client name
    pub client_name: String,
    /// Exact-match redirect URIs
    pub redirect_uris: Vec<String>,
    /// Grant types allowed for this client
    pub grant_types: Vec<String>,
    /// When this client was registered
    pub created_at: DateTime<Utc>,
}

/// Authorization code (persistence record)
#[derive(Debug, Clone)]
pub struct AuthorizationCodeRecord {
    /// The code value (64 hex chars)
    pub code: String,
    /// Client this code was minted for
    pub client_id: String,
    /// User who approved the grant
    pub user_id: Uuid,
    /// Tenant scope of the grant
    pub tenant_id: Uuid,
    /// Redirect URI the code was bound to
    pub redirect_uri: String,
    /// Granted scopes (space-separated)
    pub scope: String,
    /// PKCE code challenge the exchange must prove against
    pub code_challenge: String,
    /// When this code expires
    pub expires_at: DateTime<Utc>,
    /// When this code was minted
    pub created_at: DateTime<Utc>,
    /// When this code was redeemed (single use)
    pub used_at: Option<DateTime<Utc>>,
}

impl AuthorizationCodeRecord {
    /// Whether the code is past its expiry at the given instant
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Refresh token (persistence record, token stored as SHA-256 hex digest)
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    /// SHA-256 hex digest of the raw token
    pub token_hash: String,
    /// Client this token was issued to
    pub client_id: String,
    /// User the grant belongs to
    pub user_id: Uuid,
    /// Tenant scope of the grant
    pub tenant_id: Uuid,
    /// Granted scopes (space-separated)
    pub scope: String,
    /// When this token expires
    pub expires_at: DateTime<Utc>,
    /// When this token was issued
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Whether the token is past its expiry at the given instant
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
