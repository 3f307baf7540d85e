// ABOUTME: Credential verification and signed-token management for the CRM
// ABOUTME: Issues HS256 access tokens and the short-lived auth-session bridging token
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! # Authentication and token management
//!
//! Two token kinds are minted here, both HS256-signed with the injected
//! `JWT_SECRET` and carrying the same four identity claims
//! `{sub, tenant_id, email, role}`:
//!
//! - **Access tokens** (`aud: "meridian-api"`, 15 minutes) — the CRM's
//!   primary bearer credential, handed to OAuth clients at token exchange.
//! - **Auth-session tokens** (`aud: "meridian-consent"`, 2 minutes) — the
//!   bridge between the login form and the consent decision, so the consent
//!   step can recover the authenticated identity without re-touching the
//!   credential store.
//!
//! The distinct `aud` values pin each token to its consumer; a captured
//! session token is useless against the API and vice versa.

use crate::database::Database;
use crate::models::{User, UserRole};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Audience claim pinned on CRM access tokens
pub const ACCESS_TOKEN_AUDIENCE: &str = "meridian-api";

/// Audience claim pinned on login-to-consent bridging tokens
pub const AUTH_SESSION_AUDIENCE: &str = "meridian-consent";

/// Access token lifetime in seconds (15 minutes)
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 900;

/// Auth-session token lifetime in seconds (2 minutes)
pub const AUTH_SESSION_EXPIRY_SECS: i64 = 120;

/// `JWT` validation error with detailed information
#[derive(Debug, Clone)]
pub enum JwtValidationError {
    /// Token has expired
    TokenExpired {
        /// When the token expired
        expired_at: DateTime<Utc>,
    },
    /// Token signature or audience is invalid
    TokenInvalid {
        /// Reason for invalidity
        reason: String,
    },
    /// Token is malformed (not proper `JWT` format)
    TokenMalformed {
        /// Details about malformation
        details: String,
    },
}

impl std::fmt::Display for JwtValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenExpired { expired_at } => {
                write!(
                    f,
                    "JWT token expired at {}",
                    expired_at.format("%Y-%m-%d %H:%M:%S UTC")
                )
            }
            Self::TokenInvalid { reason } => {
                write!(f, "JWT token is invalid: {reason}")
            }
            Self::TokenMalformed { details } => {
                write!(f, "JWT token is malformed: {details}")
            }
        }
    }
}

impl std::error::Error for JwtValidationError {}

/// Authentication failure taxonomy for the login and consent steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Unknown email or wrong password - deliberately indistinguishable to
    /// the caller to avoid account enumeration
    #[error("invalid email or password")]
    InvalidCredentials,
    /// The account exists and the password verified, but the account is
    /// deactivated
    #[error("account is inactive")]
    AccountInactive,
    /// The auth-session token failed signature, audience, or expiry checks
    #[error("invalid or expired authorization session")]
    InvalidOrExpiredSession,
    /// Credential store failure
    #[error("credential verification unavailable")]
    Internal,
}

/// `JWT` claims carried by both token kinds
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User `ID`
    pub sub: String,
    /// Tenant the user belongs to
    pub tenant_id: String,
    /// User email
    pub email: String,
    /// User role inside the tenant
    pub role: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
    /// Audience (which consumer the token is intended for)
    pub aud: String,
}

/// Identity recovered from validated token claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    /// Authenticated user `ID`
    pub user_id: Uuid,
    /// Tenant scope for downstream API calls
    pub tenant_id: Uuid,
    /// User email
    pub email: String,
    /// User role
    pub role: UserRole,
}

impl AuthenticatedIdentity {
    /// Build from a user record
    #[must_use]
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            tenant_id: user.tenant_id,
            email: user.email.clone(),
            role: user.role,
        }
    }

    fn from_claims(claims: &Claims) -> Result<Self, JwtValidationError> {
        let user_id =
            Uuid::parse_str(&claims.sub).map_err(|e| JwtValidationError::TokenMalformed {
                details: format!("sub claim is not a UUID: {e}"),
            })?;
        let tenant_id =
            Uuid::parse_str(&claims.tenant_id).map_err(|e| JwtValidationError::TokenMalformed {
                details: format!("tenant_id claim is not a UUID: {e}"),
            })?;
        Ok(Self {
            user_id,
            tenant_id,
            email: claims.email.clone(),
            role: UserRole::from_str_or_default(&claims.role),
        })
    }
}

/// Authentication manager holding the HS256 signing keys
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    /// Create a new authentication manager from the injected signing secret
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    fn issue_token(
        &self,
        identity: &AuthenticatedIdentity,
        audience: &str,
        expiry_secs: i64,
    ) -> Result<String, JwtValidationError> {
        let now = Utc::now();
        let claims = Claims {
            sub: identity.user_id.to_string(),
            tenant_id: identity.tenant_id.to_string(),
            email: identity.email.clone(),
            role: identity.role.as_str().to_owned(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(expiry_secs)).timestamp(),
            aud: audience.to_owned(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            JwtValidationError::TokenInvalid {
                reason: format!("token encoding failed: {e}"),
            }
        })
    }

    fn validate_token(
        &self,
        token: &str,
        audience: &str,
    ) -> Result<Claims, JwtValidationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_audience(&[audience]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| Self::convert_jwt_error(&e))
    }

    /// Generate a CRM access token for an authenticated identity (15 minutes)
    ///
    /// # Errors
    /// Returns an error if `JWT` encoding fails
    pub fn generate_access_token(
        &self,
        identity: &AuthenticatedIdentity,
    ) -> Result<String, JwtValidationError> {
        self.issue_token(identity, ACCESS_TOKEN_AUDIENCE, ACCESS_TOKEN_EXPIRY_SECS)
    }

    /// Validate a CRM access token and return its claims
    ///
    /// # Errors
    /// Returns a [`JwtValidationError`] on signature, audience, expiry, or
    /// format failures
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtValidationError> {
        self.validate_token(token, ACCESS_TOKEN_AUDIENCE)
    }

    /// Issue the short-lived auth-session token bridging login to consent
    ///
    /// # Errors
    /// Returns an error if `JWT` encoding fails
    pub fn issue_auth_session(
        &self,
        identity: &AuthenticatedIdentity,
    ) -> Result<String, JwtValidationError> {
        self.issue_token(identity, AUTH_SESSION_AUDIENCE, AUTH_SESSION_EXPIRY_SECS)
    }

    /// Verify an auth-session token and recover the authenticated identity
    ///
    /// All signature, audience, expiry, and format failures collapse to
    /// [`AuthError::InvalidOrExpiredSession`]; the precise reason is logged.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidOrExpiredSession`] on any validation failure
    pub fn verify_auth_session(&self, token: &str) -> Result<AuthenticatedIdentity, AuthError> {
        let claims = self
            .validate_token(token, AUTH_SESSION_AUDIENCE)
            .map_err(|e| {
                tracing::warn!(reason = %e, "auth-session token rejected");
                AuthError::InvalidOrExpiredSession
            })?;

        AuthenticatedIdentity::from_claims(&claims).map_err(|e| {
            tracing::warn!(reason = %e, "auth-session token carried malformed identity claims");
            AuthError::InvalidOrExpiredSession
        })
    }

    /// Convert JWT library errors to detailed validation errors
    fn convert_jwt_error(e: &jsonwebtoken::errors::Error) -> JwtValidationError {
        use jsonwebtoken::errors::ErrorKind;

        match e.kind() {
            ErrorKind::ExpiredSignature => JwtValidationError::TokenExpired {
                expired_at: Utc::now(),
            },
            ErrorKind::InvalidSignature => JwtValidationError::TokenInvalid {
                reason: "Token signature verification failed".into(),
            },
            ErrorKind::InvalidAudience => JwtValidationError::TokenInvalid {
                reason: "Token audience does not match".into(),
            },
            ErrorKind::InvalidToken => JwtValidationError::TokenMalformed {
                details: "Token format is invalid".into(),
            },
            ErrorKind::Base64(base64_err) => JwtValidationError::TokenMalformed {
                details: format!("Token contains invalid base64: {base64_err}"),
            },
            ErrorKind::Json(json_err) => JwtValidationError::TokenMalformed {
                details: format!("Token contains invalid JSON: {json_err}"),
            },
            _ => JwtValidationError::TokenInvalid {
                reason: format!("Token validation failed: {e}"),
            },
        }
    }
}

/// Verify a password against a bcrypt hash using `spawn_blocking`
///
/// Uses `tokio::task::spawn_blocking` to avoid blocking the async executor
/// with CPU-intensive bcrypt operations.
async fn verify_password(password: &str, hash: &str) -> bool {
    let password = password.to_owned();
    let hash = hash.to_owned();

    tokio::task::spawn_blocking(move || bcrypt::verify(&password, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

/// Burn roughly one bcrypt verification worth of CPU for a nonexistent user,
/// keeping the unknown-email and wrong-password branches close in timing.
async fn equalize_timing(password: &str) {
    let password = password.to_owned();
    let _hash = tokio::task::spawn_blocking(move || {
        bcrypt::hash(&password, bcrypt::DEFAULT_COST).unwrap_or_default()
    })
    .await
    .unwrap_or_default();
}

/// Verify email/password credentials against the user store
///
/// Case-insensitive email lookup. Unknown email and wrong password are
/// deliberately indistinguishable; `AccountInactive` is only reported for an
/// existing user whose password verified.
///
/// # Errors
/// Returns [`AuthError::InvalidCredentials`], [`AuthError::AccountInactive`],
/// or [`AuthError::Internal`] on a credential-store failure
pub async fn authenticate_user(
    database: &Database,
    email: &str,
    password: &str,
) -> Result<User, AuthError> {
    let user = database.get_user_by_email(email).await.map_err(|e| {
        tracing::error!(error = %e, "user lookup failed during authentication");
        AuthError::Internal
    })?;

    let Some(user) = user else {
        equalize_timing(password).await;
        tracing::warn!(auth.event = "login", "authentication failed: unknown email");
        return Err(AuthError::InvalidCredentials);
    };

    if !verify_password(password, &user.password_hash).await {
        tracing::warn!(
            user.id = %user.id,
            auth.event = "login",
            "authentication failed: wrong password"
        );
        return Err(AuthError::InvalidCredentials);
    }

    if !user.is_active {
        tracing::warn!(
            user.id = %user.id,
            auth.event = "login",
            "authentication rejected: inactive account"
        );
        return Err(AuthError::AccountInactive);
    }

    Ok(user)
}
