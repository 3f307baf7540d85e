// ABOUTME: OAuth 2.1 HTTP route handlers for the axum web framework
// ABOUTME: Browser-facing login/consent pages plus machine-facing registration, token, and discovery endpoints
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! HTTP surface of the authorization server.
//!
//! Two sub-routers with different posture: the machine-facing endpoints
//! (`/oauth/register`, `/oauth/token`, discovery documents) answer JSON and
//! carry a permissive CORS layer; the browser-facing endpoints
//! (`/oauth/authorize` and `/oauth/authorize/consent`) render HTML and
//! get no CORS at all. All protocol decisions are delegated to
//! [`super::endpoints::OAuth2AuthorizationServer`].

use super::models::{
    AuthorizeQuery, ClientRegistrationRequest, ConsentForm, LoginForm, OAuth2Error, TokenRequest,
    DEFAULT_SCOPE,
};
use crate::auth::AuthError;
use crate::routes::ServerResources;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::fmt::Write as _;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Login page template embedded at compile time
const LOGIN_TEMPLATE: &str = include_str!("../../templates/oauth_login.html");
/// Consent page template embedded at compile time
const CONSENT_TEMPLATE: &str = include_str!("../../templates/oauth_consent.html");
/// Error page template embedded at compile time
const ERROR_TEMPLATE: &str = include_str!("../../templates/oauth_error.html");

/// OAuth 2.1 authorization server routes
pub struct OAuth2ServerRoutes;

impl OAuth2ServerRoutes {
    /// Create all OAuth 2.1 routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        let machine_routes = Router::new()
            .route("/oauth/register", post(Self::handle_register))
            .route("/oauth/token", post(Self::handle_token))
            .route(
                "/.well-known/oauth-authorization-server",
                get(Self::handle_authorization_server_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource",
                get(Self::handle_protected_resource_metadata),
            )
            .layer(CorsLayer::permissive());

        let browser_routes = Router::new()
            .route(
                "/oauth/authorize",
                get(Self::handle_authorize).post(Self::handle_login),
            )
            .route("/oauth/authorize/consent", post(Self::handle_consent));

        machine_routes.merge(browser_routes).with_state(resources)
    }

    /// Handle client registration (POST /oauth/register, RFC 7591)
    async fn handle_register(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<ClientRegistrationRequest>,
    ) -> Response {
        match resources
            .oauth2_server
            .client_manager()
            .register_client(request)
            .await
        {
            Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
            Err(error) => (Self::oauth_error_status(&error), Json(error)).into_response(),
        }
    }

    /// Handle authorization request (GET /oauth/authorize)
    ///
    /// A valid request renders the login page with every OAuth parameter
    /// carried in hidden form fields; an invalid one renders a local error
    /// page, never a redirect to an unverified URI.
    async fn handle_authorize(
        State(resources): State<Arc<ServerResources>>,
        Query(query): Query<AuthorizeQuery>,
    ) -> Response {
        let validated = resources
            .oauth2_server
            .validate_authorize_request(
                query.response_type.as_deref(),
                query.client_id.as_deref(),
                query.redirect_uri.as_deref(),
                query.scope.as_deref(),
                query.state.as_deref(),
                query.code_challenge.as_deref(),
                query.code_challenge_method.as_deref(),
            )
            .await;

        match validated {
            Ok(request) => {
                let html = render_login_page(
                    &request.client.client_name,
                    &LoginPageParams {
                        client_id: &request.client.client_id,
                        redirect_uri: &request.redirect_uri,
                        scope: &request.scope,
                        state: request.state.as_deref().unwrap_or(""),
                        code_challenge: &request.code_challenge,
                    },
                    None,
                );
                Html(html).into_response()
            }
            Err(error) => {
                tracing::warn!(
                    oauth.error = %error.error,
                    "Rejected authorization request"
                );
                render_error_response(&error)
            }
        }
    }

    /// Handle login form submission (POST /oauth/authorize)
    async fn handle_login(
        State(resources): State<Arc<ServerResources>>,
        axum::Form(form): axum::Form<LoginForm>,
    ) -> Response {
        // Re-validate the carried client parameters; hidden fields are
        // client-controlled
        let client = match resources
            .oauth2_server
            .client_manager()
            .validate_client(&form.client_id, &form.redirect_uri)
            .await
        {
            Ok(client) => client,
            Err(error) => return render_error_response(&error),
        };

        if !super::pkce::is_valid_challenge_format(&form.code_challenge)
            || form.code_challenge_method != "S256"
        {
            return render_error_response(&OAuth2Error::invalid_request(
                "Invalid PKCE parameters",
            ));
        }

        let scope = form
            .scope
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SCOPE);

        match resources.oauth2_server.login(&form.email, &form.password).await {
            Ok((user, session_token)) => {
                let html = render_consent_page(&ConsentPageParams {
                    client_name: &client.client_name,
                    user_email: &user.email,
                    auth_session_token: &session_token,
                    client_id: &form.client_id,
                    redirect_uri: &form.redirect_uri,
                    scope,
                    state: form.state.as_deref().unwrap_or(""),
                    code_challenge: &form.code_challenge,
                });
                Html(html).into_response()
            }
            Err(AuthError::Internal) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Html(render_error_page(
                    &OAuth2Error::server_error(),
                )))
                    .into_response()
            }
            Err(error) => {
                let message = match error {
                    AuthError::AccountInactive => "This account has been deactivated.",
                    _ => "Invalid email or password. Please try again.",
                };
                let html = render_login_page(
                    &client.client_name,
                    &LoginPageParams {
                        client_id: &form.client_id,
                        redirect_uri: &form.redirect_uri,
                        scope,
                        state: form.state.as_deref().unwrap_or(""),
                        code_challenge: &form.code_challenge,
                    },
                    Some(message),
                );
                (StatusCode::UNAUTHORIZED, Html(html)).into_response()
            }
        }
    }

    /// Handle consent decision (POST /oauth/authorize/consent)
    async fn handle_consent(
        State(resources): State<Arc<ServerResources>>,
        axum::Form(form): axum::Form<ConsentForm>,
    ) -> Response {
        let identity = match resources
            .oauth2_server
            .verify_auth_session(&form.auth_session_token)
        {
            Ok(identity) => identity,
            Err(_) => {
                let error = OAuth2Error::invalid_request(
                    "Your session has expired. Please start the authorization flow again.",
                );
                return (StatusCode::UNAUTHORIZED, Html(render_error_page(&error)))
                    .into_response();
            }
        };

        if let Err(error) = resources
            .oauth2_server
            .client_manager()
            .validate_client(&form.client_id, &form.redirect_uri)
            .await
        {
            return render_error_response(&error);
        }

        if !super::pkce::is_valid_challenge_format(&form.code_challenge)
            || form.code_challenge_method != "S256"
        {
            return render_error_response(&OAuth2Error::invalid_request(
                "Invalid PKCE parameters",
            ));
        }

        match form.decision.as_str() {
            "allow" => {}
            "deny" => {
                tracing::info!(
                    oauth.client_id = %form.client_id,
                    user.id = %identity.user_id,
                    "User denied consent"
                );
                let location = build_redirect_with_error(
                    &form.redirect_uri,
                    &OAuth2Error::access_denied(),
                    form.state.as_deref(),
                );
                return redirect_found(&location);
            }
            _ => {
                return render_error_response(&OAuth2Error::invalid_request(
                    "decision must be 'allow' or 'deny'",
                ));
            }
        }

        let scope = form
            .scope
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SCOPE);

        match resources
            .oauth2_server
            .issue_authorization_code(
                &identity,
                &form.client_id,
                &form.redirect_uri,
                scope,
                &form.code_challenge,
            )
            .await
        {
            Ok(code) => {
                let location =
                    build_redirect_with_code(&form.redirect_uri, &code, form.state.as_deref());
                redirect_found(&location)
            }
            Err(_) => {
                let location = build_redirect_with_error(
                    &form.redirect_uri,
                    &OAuth2Error::server_error(),
                    form.state.as_deref(),
                );
                redirect_found(&location)
            }
        }
    }

    /// Handle token request (POST /oauth/token)
    async fn handle_token(
        State(resources): State<Arc<ServerResources>>,
        axum::Form(request): axum::Form<TokenRequest>,
    ) -> Response {
        let client_id = request.client_id.clone().unwrap_or_default();

        match resources.oauth2_server.token(request).await {
            Ok(response) => (StatusCode::OK, Json(response)).into_response(),
            Err(error) => {
                tracing::warn!(
                    oauth.client_id = %client_id,
                    oauth.error = %error.error,
                    "Token request failed"
                );
                (Self::oauth_error_status(&error), Json(error)).into_response()
            }
        }
    }

    /// Authorization server metadata (RFC 8414)
    async fn handle_authorization_server_metadata(
        State(resources): State<Arc<ServerResources>>,
    ) -> Response {
        let issuer = &resources.config.oauth2.issuer_url;
        Json(serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/oauth/authorize"),
            "token_endpoint": format!("{issuer}/oauth/token"),
            "registration_endpoint": format!("{issuer}/oauth/register"),
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "response_types_supported": ["code"],
            "response_modes_supported": ["query"],
            "token_endpoint_auth_methods_supported": ["none"],
            "scopes_supported": ["crm:read", "crm:write"],
            "code_challenge_methods_supported": ["S256"]
        }))
        .into_response()
    }

    /// Protected resource metadata (RFC 9728)
    async fn handle_protected_resource_metadata(
        State(resources): State<Arc<ServerResources>>,
    ) -> Response {
        let issuer = &resources.config.oauth2.issuer_url;
        Json(serde_json::json!({
            "resource": issuer,
            "authorization_servers": [issuer],
            "scopes_supported": ["crm:read", "crm:write"],
            "bearer_methods_supported": ["header"]
        }))
        .into_response()
    }

    /// Map an OAuth error to its HTTP status for JSON endpoints
    fn oauth_error_status(error: &OAuth2Error) -> StatusCode {
        if error.error == "server_error" {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_REQUEST
        }
    }
}

/// OAuth parameters carried through the login page's hidden fields
struct LoginPageParams<'a> {
    client_id: &'a str,
    redirect_uri: &'a str,
    scope: &'a str,
    state: &'a str,
    code_challenge: &'a str,
}

/// Everything the consent page needs to render
struct ConsentPageParams<'a> {
    client_name: &'a str,
    user_email: &'a str,
    auth_session_token: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    scope: &'a str,
    state: &'a str,
    code_challenge: &'a str,
}

fn attr(value: &str) -> String {
    html_escape::encode_double_quoted_attribute(value).into_owned()
}

fn text(value: &str) -> String {
    html_escape::encode_text(value).into_owned()
}

fn render_login_page(client_name: &str, params: &LoginPageParams<'_>, error: Option<&str>) -> String {
    let error_block = error.map_or_else(String::new, |message| {
        format!(r#"<div class="error">{}</div>"#, text(message))
    });

    LOGIN_TEMPLATE
        .replace("{{client_name}}", &text(client_name))
        .replace("{{error_block}}", &error_block)
        .replace("{{client_id}}", &attr(params.client_id))
        .replace("{{redirect_uri}}", &attr(params.redirect_uri))
        .replace("{{scope}}", &attr(params.scope))
        .replace("{{state}}", &attr(params.state))
        .replace("{{code_challenge}}", &attr(params.code_challenge))
        .replace("{{code_challenge_method}}", "S256")
}

/// Human-readable descriptions for the consent page's scope list
fn describe_scope(scope: &str) -> &str {
    match scope {
        "crm:read" => "Read your contacts, deals, and activities",
        "crm:write" => "Create and modify contacts, deals, and activities",
        other => other,
    }
}

fn render_consent_page(params: &ConsentPageParams<'_>) -> String {
    let mut scope_items = String::new();
    for scope in params.scope.split_whitespace() {
        write!(&mut scope_items, "<li>{}</li>", text(describe_scope(scope))).ok();
    }

    CONSENT_TEMPLATE
        .replace("{{client_name}}", &text(params.client_name))
        .replace("{{user_email}}", &text(params.user_email))
        .replace("{{scope_items}}", &scope_items)
        .replace("{{auth_session_token}}", &attr(params.auth_session_token))
        .replace("{{client_id}}", &attr(params.client_id))
        .replace("{{redirect_uri}}", &attr(params.redirect_uri))
        .replace("{{scope}}", &attr(params.scope))
        .replace("{{state}}", &attr(params.state))
        .replace("{{code_challenge}}", &attr(params.code_challenge))
        .replace("{{code_challenge_method}}", "S256")
}

/// Render an HTML error page for OAuth errors shown in a browser
fn render_error_page(error: &OAuth2Error) -> String {
    let error_title = match error.error.as_str() {
        "invalid_client" => "Invalid Client",
        "access_denied" => "Access Denied",
        "server_error" => "Server Error",
        _ => "Authorization Error",
    };

    let default_description = "An error occurred during the authorization process.".to_owned();
    let description = error.error_description.as_ref().unwrap_or(&default_description);

    ERROR_TEMPLATE
        .replace("{{error_title}}", error_title)
        .replace("{{error}}", &text(&error.error))
        .replace("{{description}}", &text(description))
}

fn render_error_response(error: &OAuth2Error) -> Response {
    (StatusCode::BAD_REQUEST, Html(render_error_page(error))).into_response()
}

fn redirect_found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

/// Build the success redirect: `{redirect_uri}?code=...&state=...`
fn build_redirect_with_code(redirect_uri: &str, code: &str, state: Option<&str>) -> String {
    let mut location = format!("{redirect_uri}?code={code}");
    if let Some(state) = state.filter(|s| !s.is_empty()) {
        write!(&mut location, "&state={}", urlencoding::encode(state)).ok();
    }
    location
}

/// Build the failure redirect: `{redirect_uri}?error=...&state=...`
fn build_redirect_with_error(
    redirect_uri: &str,
    error: &OAuth2Error,
    state: Option<&str>,
) -> String {
    let mut location = format!("{redirect_uri}?error={}", error.error);
    if let Some(state) = state.filter(|s| !s.is_empty()) {
        write!(&mut location, "&state={}", urlencoding::encode(state)).ok();
    }
    location
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_building() {
        assert_eq!(
            build_redirect_with_code("https://app.example/cb", "abc123", Some("st&ate")),
            "https://app.example/cb?code=abc123&state=st%26ate"
        );
        assert_eq!(
            build_redirect_with_code("https://app.example/cb", "abc123", None),
            "https://app.example/cb?code=abc123"
        );
        assert_eq!(
            build_redirect_with_error(
                "https://app.example/cb",
                &OAuth2Error::access_denied(),
                Some("xyz")
            ),
            "https://app.example/cb?error=access_denied&state=xyz"
        );
    }

    #[test]
    fn test_login_page_escapes_parameters() {
        let html = render_login_page(
            "Acme <script>alert(1)</script>",
            &LoginPageParams {
                client_id: "crm_client_abc",
                redirect_uri: "https://app.example/cb?a=\"b\"",
                scope: "crm:read",
                state: "<state>",
                code_challenge: "challenge",
            },
            Some("Invalid email or password. Please try again."),
        );

        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("Invalid email or password"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_consent_page_lists_scopes() {
        let html = render_consent_page(&ConsentPageParams {
            client_name: "Acme Importer",
            user_email: "rep@acme.example",
            auth_session_token: "token",
            client_id: "crm_client_abc",
            redirect_uri: "https://app.example/cb",
            scope: "crm:read crm:write",
            state: "",
            code_challenge: "challenge",
        });

        assert!(html.contains("Read your contacts, deals, and activities"));
        assert!(html.contains("Create and modify contacts, deals, and activities"));
        assert!(html.contains(r#"name="decision" value="allow""#));
        assert!(html.contains(r#"name="code_challenge_method" value="S256""#));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_error_page_renders_description() {
        let html = render_error_page(&OAuth2Error::invalid_client("Unknown client"));
        assert!(html.contains("Invalid Client"));
        assert!(html.contains("invalid_client"));
        assert!(html.contains("Unknown client"));
        assert!(!html.contains("{{"));
    }
}
