// ABOUTME: End-to-end HTTP tests for the OAuth 2.1 authorization-code + PKCE flow
// ABOUTME: Register, authorize, login, consent, exchange, refresh, and discovery
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use helpers::axum_test::AxumTestRequest;
use serde_json::json;

const REDIRECT_URI: &str = "https://app.acme.example/callback";

/// Pull a hidden form field value out of a rendered HTML page
fn extract_hidden_field(html: &str, name: &str) -> String {
    let marker = format!(r#"name="{name}" value=""#);
    let start = html
        .find(&marker)
        .unwrap_or_else(|| panic!("hidden field {name} not found in page"))
        + marker.len();
    let end = html[start..].find('"').expect("unterminated attribute") + start;
    html[start..end].to_owned()
}

/// Pull a query parameter out of a redirect Location header
fn query_param(location: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(location).expect("redirect location is a valid URL");
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

async fn register_client(app: &axum::Router) -> String {
    let response = AxumTestRequest::post("/oauth/register")
        .json(&json!({
            "client_name": "Acme Importer",
            "redirect_uris": [REDIRECT_URI]
        }))
        .send(app.clone())
        .await;
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json();
    body["client_id"].as_str().unwrap().to_owned()
}

/// Drive the browser half of the flow and return the authorization code
async fn obtain_authorization_code(
    app: &axum::Router,
    client_id: &str,
    challenge: &str,
    state: &str,
) -> String {
    // GET /oauth/authorize renders the login page
    let authorize_uri = format!(
        "/oauth/authorize?response_type=code&client_id={client_id}\
         &redirect_uri={}&state={}&code_challenge={challenge}&code_challenge_method=S256",
        urlencoding::encode(REDIRECT_URI),
        urlencoding::encode(state),
    );
    let response = AxumTestRequest::get(&authorize_uri).send(app.clone()).await;
    assert_eq!(response.status(), 200);
    let login_page = response.text();
    assert!(login_page.contains("Acme Importer"));
    assert_eq!(extract_hidden_field(&login_page, "code_challenge"), challenge);

    // POST /oauth/authorize with valid credentials renders the consent page
    let response = AxumTestRequest::post("/oauth/authorize")
        .form(&[
            ("email", common::TEST_EMAIL),
            ("password", common::TEST_PASSWORD),
            ("client_id", client_id),
            ("redirect_uri", REDIRECT_URI),
            ("scope", ""),
            ("state", state),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
        ])
        .send(app.clone())
        .await;
    assert_eq!(response.status(), 200);
    let consent_page = response.text();
    assert!(consent_page.contains(common::TEST_EMAIL));
    let session_token = extract_hidden_field(&consent_page, "auth_session_token");

    // POST /oauth/authorize/consent allowing redirects back with the code
    let response = AxumTestRequest::post("/oauth/authorize/consent")
        .form(&[
            ("auth_session_token", session_token.as_str()),
            ("client_id", client_id),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "crm:read crm:write"),
            ("state", state),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
            ("decision", "allow"),
        ])
        .send(app.clone())
        .await;
    assert_eq!(response.status(), 302);
    let location = response.header("location").expect("Location header");
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(query_param(&location, "state").as_deref(), Some(state));

    let code = query_param(&location, "code").expect("code in redirect");
    assert_eq!(code.len(), 64, "authorization code is 64 hex chars");
    assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
    code
}

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let (app, resources) = common::create_test_app().await;
    let user = common::seed_test_user(&resources).await;
    let client_id = register_client(&app).await;

    let verifier = common::generate_code_verifier();
    let challenge = common::generate_code_challenge(&verifier);
    let code = obtain_authorization_code(&app, &client_id, &challenge, "xyz-state").await;

    // Exchange the code
    let response = AxumTestRequest::post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ])
        .send(app.clone())
        .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["expires_in"], 900);
    assert_eq!(body["scope"], "crm:read crm:write");
    let refresh_token = body["refresh_token"].as_str().unwrap().to_owned();
    assert_eq!(refresh_token.len(), 43);

    // The access token carries the user's identity and tenant
    let claims = resources
        .auth_manager
        .validate_access_token(body["access_token"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.sub, user.id.to_string());
    assert_eq!(claims.tenant_id, user.tenant_id.to_string());
    assert_eq!(claims.aud, "meridian-api");

    // Replaying the same code fails
    let response = AxumTestRequest::post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ])
        .send(app.clone())
        .await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");

    // Refresh rotates the token
    let response = AxumTestRequest::post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", client_id.as_str()),
        ])
        .send(app.clone())
        .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json();
    let new_refresh = body["refresh_token"].as_str().unwrap().to_owned();
    assert_ne!(new_refresh, refresh_token);

    // The spent refresh token no longer works
    let response = AxumTestRequest::post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", client_id.as_str()),
        ])
        .send(app.clone())
        .await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");

    // The rotated one does
    let response = AxumTestRequest::post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", new_refresh.as_str()),
            ("client_id", client_id.as_str()),
        ])
        .send(app)
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_state_is_echoed_verbatim() {
    let (app, resources) = common::create_test_app().await;
    common::seed_test_user(&resources).await;
    let client_id = register_client(&app).await;

    let verifier = common::generate_code_verifier();
    let challenge = common::generate_code_challenge(&verifier);
    let state = "opaque&value with spaces";
    let code = obtain_authorization_code(&app, &client_id, &challenge, state).await;
    assert!(!code.is_empty());
}

#[tokio::test]
async fn test_authorization_server_metadata() {
    let (app, _resources) = common::create_test_app().await;

    let response = AxumTestRequest::get("/.well-known/oauth-authorization-server")
        .send(app)
        .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["issuer"], "http://localhost:8081");
    assert_eq!(
        body["authorization_endpoint"],
        "http://localhost:8081/oauth/authorize"
    );
    assert_eq!(body["token_endpoint"], "http://localhost:8081/oauth/token");
    assert_eq!(
        body["registration_endpoint"],
        "http://localhost:8081/oauth/register"
    );
    assert_eq!(body["code_challenge_methods_supported"], json!(["S256"]));
    assert_eq!(body["token_endpoint_auth_methods_supported"], json!(["none"]));
    assert_eq!(body["grant_types_supported"], json!(["authorization_code", "refresh_token"]));
}

#[tokio::test]
async fn test_protected_resource_metadata() {
    let (app, _resources) = common::create_test_app().await;

    let response = AxumTestRequest::get("/.well-known/oauth-protected-resource")
        .send(app)
        .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["resource"], "http://localhost:8081");
    assert_eq!(body["authorization_servers"], json!(["http://localhost:8081"]));
    assert_eq!(body["scopes_supported"], json!(["crm:read", "crm:write"]));
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _resources) = common::create_test_app().await;

    let response = AxumTestRequest::get("/health").send(app).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "meridian-crm-server");
    assert_eq!(body["database"], "ok");
}
