// ABOUTME: OAuth 2.1 authorization and token endpoint logic
// ABOUTME: Single-use code redemption and refresh rotation with race-loss attribution
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! Protocol core of the authorization server, HTTP-free.
//!
//! The HTTP layer (`routes`) extracts requests and renders pages; everything
//! protocol-shaped happens here: authorize-request validation, credential
//! login, code minting on consent, and the two token grants. Grant failures
//! all surface as `invalid_grant` on the wire; the precise cause is logged
//! server-side only.

use super::client_registration::ClientRegistrationManager;
use super::models::{
    AuthorizationCodeRecord, OAuth2Client, OAuth2Error, RefreshTokenRecord, TokenRequest,
    TokenResponse, AUTH_CODE_EXPIRY_SECS, DEFAULT_SCOPE, REFRESH_TOKEN_EXPIRY_DAYS,
};
use super::pkce;
use crate::auth::{
    authenticate_user, AuthError, AuthManager, AuthenticatedIdentity, ACCESS_TOKEN_EXPIRY_SECS,
};
use crate::crypto::random::{generate_authorization_code, generate_refresh_token};
use crate::database::Database;
use crate::logging::AppLogger;
use crate::models::User;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// An authorize request that passed client, redirect, and PKCE validation
#[derive(Debug)]
pub struct ValidatedAuthorizeRequest {
    /// The registered client
    pub client: OAuth2Client,
    /// Redirect URI (exact match against the registration)
    pub redirect_uri: String,
    /// Scopes to grant (defaulted when the client asked for none)
    pub scope: String,
    /// Client state, echoed back verbatim on redirect
    pub state: Option<String>,
    /// S256 code challenge the eventual exchange must prove against
    pub code_challenge: String,
}

/// OAuth 2.1 Authorization Server
pub struct OAuth2AuthorizationServer {
    client_manager: ClientRegistrationManager,
    auth_manager: Arc<AuthManager>,
    database: Arc<Database>,
}

impl OAuth2AuthorizationServer {
    #[must_use]
    pub fn new(database: Arc<Database>, auth_manager: Arc<AuthManager>) -> Self {
        let client_manager = ClientRegistrationManager::new(database.clone());

        Self {
            client_manager,
            auth_manager,
            database,
        }
    }

    /// Access the client registration manager
    #[must_use]
    pub const fn client_manager(&self) -> &ClientRegistrationManager {
        &self.client_manager
    }

    /// Validate the parameters of an authorization request.
    ///
    /// Client identity and redirect URI are checked before anything else, so
    /// the caller knows whether it may redirect errors back to the client or
    /// must render them locally.
    ///
    /// # Errors
    /// Returns an [`OAuth2Error`] describing the first failed check
    pub async fn validate_authorize_request(
        &self,
        response_type: Option<&str>,
        client_id: Option<&str>,
        redirect_uri: Option<&str>,
        scope: Option<&str>,
        state: Option<&str>,
        code_challenge: Option<&str>,
        code_challenge_method: Option<&str>,
    ) -> Result<ValidatedAuthorizeRequest, OAuth2Error> {
        let client_id =
            client_id.ok_or_else(|| OAuth2Error::invalid_request("client_id is required"))?;
        let redirect_uri = redirect_uri
            .ok_or_else(|| OAuth2Error::invalid_request("redirect_uri is required"))?;

        let client = self
            .client_manager
            .validate_client(client_id, redirect_uri)
            .await?;

        if response_type != Some("code") {
            return Err(OAuth2Error::invalid_request(
                "Only 'code' response_type is supported",
            ));
        }

        let code_challenge = code_challenge.ok_or_else(|| {
            OAuth2Error::invalid_request("code_challenge is required (PKCE is mandatory)")
        })?;

        if !pkce::is_valid_challenge_format(code_challenge) {
            return Err(OAuth2Error::invalid_request(
                "code_challenge must be a base64url-encoded SHA-256 digest",
            ));
        }

        if code_challenge_method != Some("S256") {
            return Err(OAuth2Error::invalid_request(
                "code_challenge_method must be 'S256' (plain method is not supported)",
            ));
        }

        let scope = match scope {
            Some(s) if !s.trim().is_empty() => s.to_owned(),
            _ => DEFAULT_SCOPE.to_owned(),
        };

        Ok(ValidatedAuthorizeRequest {
            client,
            redirect_uri: redirect_uri.to_owned(),
            scope,
            state: state.map(str::to_owned),
            code_challenge: code_challenge.to_owned(),
        })
    }

    /// Verify login credentials and hand back the identity plus the
    /// short-lived auth-session token that bridges to the consent step.
    ///
    /// # Errors
    /// Returns an [`AuthError`] on credential failure
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(User, String), AuthError> {
        let user = authenticate_user(&self.database, email, password).await?;

        let identity = AuthenticatedIdentity::from_user(&user);
        let session_token = self.auth_manager.issue_auth_session(&identity).map_err(|e| {
            tracing::error!(error = %e, "Failed to issue auth-session token");
            AuthError::Internal
        })?;

        AppLogger::log_auth_event(&user.id.to_string(), "oauth_login", true, None);

        Ok((user, session_token))
    }

    /// Verify an auth-session token from the consent form
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidOrExpiredSession`] on any validation failure
    pub fn verify_auth_session(&self, token: &str) -> Result<AuthenticatedIdentity, AuthError> {
        self.auth_manager.verify_auth_session(token)
    }

    /// Mint a single-use authorization code after the user approved consent
    ///
    /// # Errors
    /// Returns an [`OAuth2Error`] if code generation or storage fails
    pub async fn issue_authorization_code(
        &self,
        identity: &AuthenticatedIdentity,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        code_challenge: &str,
    ) -> Result<String, OAuth2Error> {
        let code = generate_authorization_code().map_err(|e| {
            tracing::error!(error = %e, "Failed to generate authorization code");
            OAuth2Error::server_error()
        })?;

        let now = Utc::now();
        let record = AuthorizationCodeRecord {
            code: code.clone(),
            client_id: client_id.to_owned(),
            user_id: identity.user_id,
            tenant_id: identity.tenant_id,
            redirect_uri: redirect_uri.to_owned(),
            scope: scope.to_owned(),
            code_challenge: code_challenge.to_owned(),
            expires_at: now + Duration::seconds(AUTH_CODE_EXPIRY_SECS),
            created_at: now,
            used_at: None,
        };

        self.database.store_auth_code(&record).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to store authorization code");
            OAuth2Error::server_error()
        })?;

        AppLogger::log_oauth_event(client_id, "authorization_code_issued", true);

        Ok(code)
    }

    /// Handle token request (POST /oauth/token)
    ///
    /// # Errors
    /// Returns an [`OAuth2Error`] per RFC 6749 Section 5.2
    pub async fn token(&self, request: TokenRequest) -> Result<TokenResponse, OAuth2Error> {
        match request.grant_type.as_str() {
            "authorization_code" => self.handle_authorization_code_grant(request).await,
            "refresh_token" => self.handle_refresh_token_grant(request).await,
            _ => Err(OAuth2Error::unsupported_grant_type()),
        }
    }

    /// Handle authorization code grant
    async fn handle_authorization_code_grant(
        &self,
        request: TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        let code = request
            .code
            .ok_or_else(|| OAuth2Error::invalid_request("Missing authorization code"))?;
        let redirect_uri = request
            .redirect_uri
            .ok_or_else(|| OAuth2Error::invalid_request("Missing redirect_uri"))?;
        let client_id = request
            .client_id
            .ok_or_else(|| OAuth2Error::invalid_request("Missing client_id"))?;
        let code_verifier = request
            .code_verifier
            .ok_or_else(|| OAuth2Error::invalid_request("Missing code_verifier"))?;

        let auth_code = self
            .consume_and_check_auth_code(&code, &client_id, &redirect_uri, &code_verifier)
            .await?;

        let user = self.load_grant_user(auth_code.user_id).await?;

        let response = self.issue_token_pair(&user, &client_id, &auth_code.scope).await?;

        AppLogger::log_oauth_event(&client_id, "authorization_code_redeemed", true);

        Ok(response)
    }

    /// Consume the code (single use, atomically) and run the bound checks.
    ///
    /// Check order when this caller wins the consume race: expiry, client
    /// binding, redirect binding, PKCE proof. When it loses, the row is
    /// re-fetched to distinguish replay from an unknown code. Every failure
    /// collapses to `invalid_grant` on the wire.
    async fn consume_and_check_auth_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<AuthorizationCodeRecord, OAuth2Error> {
        let now = Utc::now();

        let consumed = self.database.consume_auth_code(code, now).await.map_err(|e| {
            tracing::error!(error = %e, "Authorization code consumption failed");
            OAuth2Error::server_error()
        })?;

        let Some(record) = consumed else {
            let existing = self.database.get_auth_code(code).await.map_err(|e| {
                tracing::error!(error = %e, "Authorization code lookup failed");
                OAuth2Error::server_error()
            })?;

            if existing.is_some() {
                AppLogger::log_security_event(
                    "auth_code_replay",
                    "authorization code presented more than once",
                );
                return Err(OAuth2Error::invalid_grant(
                    "Authorization code has already been used",
                ));
            }

            tracing::warn!(oauth.client_id = %client_id, "Unknown authorization code presented");
            return Err(OAuth2Error::invalid_grant("Invalid authorization code"));
        };

        if record.is_expired(now) {
            tracing::warn!(oauth.client_id = %client_id, "Expired authorization code presented");
            return Err(OAuth2Error::invalid_grant("Authorization code has expired"));
        }

        if record.client_id != client_id {
            AppLogger::log_security_event(
                "auth_code_client_mismatch",
                "authorization code presented by a different client than it was issued to",
            );
            return Err(OAuth2Error::invalid_grant(
                "Authorization code was not issued to this client",
            ));
        }

        if record.redirect_uri != redirect_uri {
            AppLogger::log_security_event(
                "auth_code_redirect_mismatch",
                "redirect_uri at exchange does not match the one at authorization",
            );
            return Err(OAuth2Error::invalid_grant(
                "redirect_uri does not match the authorization request",
            ));
        }

        if !pkce::verify_s256(code_verifier, &record.code_challenge) {
            AppLogger::log_security_event(
                "pkce_verification_failed",
                "code_verifier does not prove the stored code_challenge",
            );
            return Err(OAuth2Error::invalid_grant("PKCE verification failed"));
        }

        Ok(record)
    }

    /// Handle refresh token grant with rotation
    async fn handle_refresh_token_grant(
        &self,
        request: TokenRequest,
    ) -> Result<TokenResponse, OAuth2Error> {
        let refresh_token = request
            .refresh_token
            .ok_or_else(|| OAuth2Error::invalid_request("Missing refresh_token"))?;
        let client_id = request
            .client_id
            .ok_or_else(|| OAuth2Error::invalid_request("Missing client_id"))?;

        let presented_hash = Self::hash_refresh_token(&refresh_token);
        let now = Utc::now();

        // Unauthoritative pre-read for attribution and to carry the grant's
        // identity into the replacement; the rotation itself re-checks
        // everything inside its transaction.
        let old = self
            .database
            .get_refresh_token(&presented_hash)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Refresh token lookup failed");
                OAuth2Error::server_error()
            })?;

        let Some(old) = old else {
            tracing::warn!(oauth.client_id = %client_id, "Unknown refresh token presented");
            return Err(OAuth2Error::invalid_grant("Invalid refresh token"));
        };

        if old.client_id != client_id {
            AppLogger::log_security_event(
                "refresh_token_client_mismatch",
                "refresh token presented by a different client than it was issued to",
            );
            return Err(OAuth2Error::invalid_grant("Invalid refresh token"));
        }

        if old.is_expired(now) {
            tracing::warn!(oauth.client_id = %client_id, "Expired refresh token presented");
            return Err(OAuth2Error::invalid_grant("Refresh token has expired"));
        }

        let new_raw = generate_refresh_token().map_err(|e| {
            tracing::error!(error = %e, "Failed to generate refresh token");
            OAuth2Error::server_error()
        })?;

        let replacement = RefreshTokenRecord {
            token_hash: Self::hash_refresh_token(&new_raw),
            client_id: old.client_id.clone(),
            user_id: old.user_id,
            tenant_id: old.tenant_id,
            scope: old.scope.clone(),
            expires_at: now + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS),
            created_at: now,
        };

        let rotated = self
            .database
            .rotate_refresh_token(&presented_hash, &client_id, now, &replacement)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Refresh token rotation failed");
                OAuth2Error::server_error()
            })?;

        let Some(old) = rotated else {
            // Lost the rotation race: the token was spent between the
            // pre-read and the transaction
            AppLogger::log_security_event(
                "refresh_token_replay",
                "refresh token rotated concurrently or already spent",
            );
            return Err(OAuth2Error::invalid_grant("Invalid refresh token"));
        };

        let user = self.load_grant_user(old.user_id).await?;

        let identity = AuthenticatedIdentity::from_user(&user);
        let access_token = self
            .auth_manager
            .generate_access_token(&identity)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to generate access token");
                OAuth2Error::server_error()
            })?;

        AppLogger::log_oauth_event(&client_id, "refresh_token_rotated", true);

        Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_owned(),
            expires_in: ACCESS_TOKEN_EXPIRY_SECS,
            refresh_token: new_raw,
            scope: old.scope,
        })
    }

    /// Load the user behind a grant; a vanished or deactivated account
    /// invalidates the grant
    async fn load_grant_user(&self, user_id: uuid::Uuid) -> Result<User, OAuth2Error> {
        let user = self
            .database
            .get_user_by_id(user_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "User lookup failed during token grant");
                OAuth2Error::server_error()
            })?
            .ok_or_else(|| {
                tracing::warn!(user.id = %user_id, "Grant refers to a user that no longer exists");
                OAuth2Error::invalid_grant("Grant is no longer valid")
            })?;

        if !user.is_active {
            tracing::warn!(user.id = %user.id, "Grant refers to a deactivated user");
            return Err(OAuth2Error::invalid_grant("Grant is no longer valid"));
        }

        Ok(user)
    }

    /// Mint an access token plus a fresh refresh token for a grant
    async fn issue_token_pair(
        &self,
        user: &User,
        client_id: &str,
        scope: &str,
    ) -> Result<TokenResponse, OAuth2Error> {
        let identity = AuthenticatedIdentity::from_user(user);

        let access_token = self
            .auth_manager
            .generate_access_token(&identity)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to generate access token");
                OAuth2Error::server_error()
            })?;

        let refresh_raw = generate_refresh_token().map_err(|e| {
            tracing::error!(error = %e, "Failed to generate refresh token");
            OAuth2Error::server_error()
        })?;

        let now = Utc::now();
        let record = RefreshTokenRecord {
            token_hash: Self::hash_refresh_token(&refresh_raw),
            client_id: client_id.to_owned(),
            user_id: user.id,
            tenant_id: user.tenant_id,
            scope: scope.to_owned(),
            expires_at: now + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS),
            created_at: now,
        };

        self.database.store_refresh_token(&record).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to store refresh token");
            OAuth2Error::server_error()
        })?;

        Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_owned(),
            expires_in: ACCESS_TOKEN_EXPIRY_SECS,
            refresh_token: refresh_raw,
            scope: scope.to_owned(),
        })
    }

    /// SHA-256 hex digest of a raw refresh token (what gets stored at rest)
    #[must_use]
    pub fn hash_refresh_token(raw: &str) -> String {
        let digest = Sha256::digest(raw.as_bytes());
        format!("{digest:x}")
    }
}
