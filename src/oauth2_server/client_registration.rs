// ABOUTME: OAuth 2.1 dynamic client registration implementation (RFC 7591)
// ABOUTME: All registered clients are public - PKCE replaces client secrets
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

use super::models::{
    ClientRegistrationRequest, ClientRegistrationResponse, OAuth2Client, OAuth2Error,
    SUPPORTED_GRANT_TYPES,
};
use crate::database::Database;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// OAuth 2.1 Client Registration Manager
pub struct ClientRegistrationManager {
    database: Arc<Database>,
}

impl ClientRegistrationManager {
    /// Creates a new client registration manager
    #[must_use]
    pub const fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Register a new OAuth 2.1 public client (RFC 7591)
    ///
    /// # Errors
    /// Returns an error if the metadata fails validation or storage fails
    pub async fn register_client(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, OAuth2Error> {
        Self::validate_registration_request(&request)?;

        let client_id = Self::generate_client_id();

        // Every client gets the full grant set regardless of what subset it
        // asked for; the request is validated, not narrowed
        let grant_types: Vec<String> = SUPPORTED_GRANT_TYPES
            .iter()
            .map(|&g| g.to_owned())
            .collect();

        let client = OAuth2Client {
            client_id: client_id.clone(),
            client_name: request.client_name.clone(),
            redirect_uris: request.redirect_uris.clone(),
            grant_types: grant_types.clone(),
            created_at: Utc::now(),
        };

        self.database.store_oauth2_client(&client).await.map_err(|e| {
            tracing::error!(error = %e, client_id = %client_id, "Failed to store OAuth2 client registration");
            OAuth2Error::server_error()
        })?;

        tracing::info!(
            oauth.client_id = %client_id,
            oauth.client_name = %request.client_name,
            "OAuth2 client registered"
        );

        Ok(ClientRegistrationResponse {
            client_id,
            client_name: request.client_name,
            redirect_uris: request.redirect_uris,
            grant_types,
            token_endpoint_auth_method: "none".to_owned(),
        })
    }

    /// Look up a client and check that a redirect URI is registered for it.
    ///
    /// URI comparison is exact string match - no prefix or pattern matching.
    ///
    /// # Errors
    /// Returns an error if the client is unknown or the URI is not registered
    pub async fn validate_client(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<OAuth2Client, OAuth2Error> {
        let client = self
            .database
            .get_oauth2_client(client_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "OAuth2 client lookup failed");
                OAuth2Error::server_error()
            })?
            .ok_or_else(|| {
                tracing::warn!(oauth.client_id = %client_id, "Unknown OAuth2 client");
                OAuth2Error::invalid_client("Unknown client")
            })?;

        if !client.redirect_uris.iter().any(|uri| uri == redirect_uri) {
            tracing::warn!(
                oauth.client_id = %client_id,
                "redirect_uri not registered for client"
            );
            return Err(OAuth2Error::invalid_request(
                "redirect_uri is not registered for this client",
            ));
        }

        Ok(client)
    }

    /// Validate registration request metadata
    fn validate_registration_request(
        request: &ClientRegistrationRequest,
    ) -> Result<(), OAuth2Error> {
        if request.client_name.trim().is_empty() {
            return Err(OAuth2Error::invalid_client_metadata(
                "client_name is required",
            ));
        }

        if request.redirect_uris.is_empty() {
            return Err(OAuth2Error::invalid_client_metadata(
                "At least one redirect_uri is required",
            ));
        }

        for uri in &request.redirect_uris {
            if !Self::is_valid_redirect_uri(uri) {
                return Err(OAuth2Error::invalid_client_metadata(&format!(
                    "Invalid redirect_uri: {uri}"
                )));
            }
        }

        if let Some(ref grant_types) = request.grant_types {
            for grant_type in grant_types {
                if !SUPPORTED_GRANT_TYPES.contains(&grant_type.as_str()) {
                    return Err(OAuth2Error::invalid_client_metadata(&format!(
                        "Unsupported grant_type: {grant_type}"
                    )));
                }
            }
        }

        // Public clients only; a client asking for secret-based auth is
        // misconfigured for this server
        if let Some(ref method) = request.token_endpoint_auth_method {
            if method != "none" {
                return Err(OAuth2Error::invalid_client_metadata(
                    "Only token_endpoint_auth_method \"none\" is supported",
                ));
            }
        }

        Ok(())
    }

    /// Check if redirect URI is valid
    fn is_valid_redirect_uri(uri: &str) -> bool {
        // OAuth 2.0 Security Best Practices (RFC 6749 Section 3.1.2.2)
        // - MUST be absolute URI
        // - MUST NOT include fragment component
        // - SHOULD use https:// except for localhost/loopback

        if !Self::validate_uri_format(uri) {
            return false;
        }

        // Allow out-of-band URN for native apps (RFC 8252)
        if uri == "urn:ietf:wg:oauth:2.0:oob" {
            return true;
        }

        Self::validate_http_uri(uri)
    }

    /// Validate basic URI format requirements
    fn validate_uri_format(uri: &str) -> bool {
        if uri.trim().is_empty() {
            return false;
        }

        // Reject URIs with fragments (RFC 6749 Section 3.1.2)
        if uri.contains('#') {
            tracing::warn!("Rejected redirect_uri with fragment: {}", uri);
            return false;
        }

        // Reject wildcard patterns (subdomain bypass attack prevention)
        if uri.contains('*') {
            tracing::warn!("Rejected redirect_uri with wildcard: {}", uri);
            return false;
        }

        true
    }

    /// Validate HTTP(S) URI scheme and host
    fn validate_http_uri(uri: &str) -> bool {
        let Ok(parsed_uri) = url::Url::parse(uri) else {
            tracing::warn!("Rejected malformed redirect_uri: {}", uri);
            return false;
        };

        let scheme = parsed_uri.scheme();
        let is_localhost = parsed_uri.host_str() == Some("localhost")
            || parsed_uri.host_str() == Some("127.0.0.1");

        if scheme == "https" {
            return true;
        }

        if scheme == "http" && is_localhost {
            return true;
        }

        tracing::warn!(
            "Rejected redirect_uri with non-HTTPS scheme for non-localhost: {}",
            uri
        );
        false
    }

    /// Generate client ID
    fn generate_client_id() -> String {
        format!("crm_client_{}", Uuid::new_v4().simple())
    }
}
