// ABOUTME: HTTP tests for the authorization server's failure modes
// ABOUTME: Bad authorize params, failed logins, rejected consent, and dead grants
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use chrono::{Duration, Utc};
use helpers::axum_test::AxumTestRequest;
use meridian_crm_server::auth::AuthenticatedIdentity;
use meridian_crm_server::oauth2_server::models::{AuthorizationCodeRecord, RefreshTokenRecord};
use meridian_crm_server::oauth2_server::OAuth2AuthorizationServer;
use serde_json::json;

const REDIRECT_URI: &str = "https://app.acme.example/callback";

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

fn challenge() -> String {
    common::generate_code_challenge(&common::generate_code_verifier())
}

#[tokio::test]
async fn test_authorize_with_unknown_client_renders_error_page() {
    let (app, _resources) = common::create_test_app().await;

    let response = AxumTestRequest::get(&format!(
        "/oauth/authorize?response_type=code&client_id=crm_client_unknown\
         &redirect_uri={}&code_challenge={}&code_challenge_method=S256",
        urlencoding::encode(REDIRECT_URI),
        challenge(),
    ))
    .send(app)
    .await;

    assert_eq!(response.status(), 400);
    let html = response.text();
    assert!(html.contains("invalid_client"));
}

#[tokio::test]
async fn test_authorize_with_unregistered_redirect_renders_error_page() {
    let (app, _resources) = common::create_test_app().await;
    let client_id = register_client(&app).await;

    let response = AxumTestRequest::get(&format!(
        "/oauth/authorize?response_type=code&client_id={client_id}\
         &redirect_uri={}&code_challenge={}&code_challenge_method=S256",
        urlencoding::encode("https://evil.example/callback"),
        challenge(),
    ))
    .send(app)
    .await;

    assert_eq!(response.status(), 400);
    // error stays on our page, never a redirect to the unregistered URI
    let html = response.text();
    assert!(html.contains("invalid_request"));
}

#[tokio::test]
async fn test_authorize_requires_s256_pkce() {
    let (app, _resources) = common::create_test_app().await;
    let client_id = register_client(&app).await;

    // missing code_challenge
    let response = AxumTestRequest::get(&format!(
        "/oauth/authorize?response_type=code&client_id={client_id}&redirect_uri={}",
        urlencoding::encode(REDIRECT_URI),
    ))
    .send(app.clone())
    .await;
    assert_eq!(response.status(), 400);

    // plain method
    let response = AxumTestRequest::get(&format!(
        "/oauth/authorize?response_type=code&client_id={client_id}\
         &redirect_uri={}&code_challenge={}&code_challenge_method=plain",
        urlencoding::encode(REDIRECT_URI),
        challenge(),
    ))
    .send(app)
    .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_login_with_wrong_password_rerenders_login() {
    let (app, resources) = common::create_test_app().await;
    common::seed_test_user(&resources).await;
    let client_id = register_client(&app).await;
    let challenge = challenge();

    let response = AxumTestRequest::post("/oauth/authorize")
        .form(&[
            ("email", common::TEST_EMAIL),
            ("password", "wrong-password"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "crm:read"),
            ("state", ""),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ])
        .send(app)
        .await;

    assert_eq!(response.status(), 401);
    let html = response.text();
    assert!(html.contains("Invalid email or password"));
    // OAuth parameters survive the re-render
    assert!(html.contains(&challenge));
}

#[tokio::test]
async fn test_login_unknown_email_gets_same_message() {
    let (app, resources) = common::create_test_app().await;
    common::seed_test_user(&resources).await;
    let client_id = register_client(&app).await;

    let response = AxumTestRequest::post("/oauth/authorize")
        .form(&[
            ("email", "nobody@acme.example"),
            ("password", "whatever-password"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", ""),
            ("state", ""),
            ("code_challenge", challenge().as_str()),
            ("code_challenge_method", "S256"),
        ])
        .send(app)
        .await;

    assert_eq!(response.status(), 401);
    assert!(response.text().contains("Invalid email or password"));
}

#[tokio::test]
async fn test_login_inactive_account_rejected_after_valid_password() {
    let (app, resources) = common::create_test_app().await;
    common::seed_user(&resources, "inactive@acme.example", "hunter2hunter2", false).await;
    let client_id = register_client(&app).await;

    let response = AxumTestRequest::post("/oauth/authorize")
        .form(&[
            ("email", "inactive@acme.example"),
            ("password", "hunter2hunter2"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", ""),
            ("state", ""),
            ("code_challenge", challenge().as_str()),
            ("code_challenge_method", "S256"),
        ])
        .send(app)
        .await;

    assert_eq!(response.status(), 401);
    assert!(response.text().contains("deactivated"));
}

#[tokio::test]
async fn test_consent_with_invalid_session_returns_401() {
    let (app, _resources) = common::create_test_app().await;
    let client_id = register_client(&app).await;

    let response = AxumTestRequest::post("/oauth/authorize/consent")
        .form(&[
            ("auth_session_token", "not-a-valid-token"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "crm:read"),
            ("state", ""),
            ("code_challenge", challenge().as_str()),
            ("code_challenge_method", "S256"),
            ("decision", "allow"),
        ])
        .send(app)
        .await;

    assert_eq!(response.status(), 401);
    assert!(response.text().contains("session has expired"));
}

#[tokio::test]
async fn test_consent_deny_redirects_with_access_denied() {
    let (app, resources) = common::create_test_app().await;
    let user = common::seed_test_user(&resources).await;
    let client_id = register_client(&app).await;

    let identity = AuthenticatedIdentity::from_user(&user);
    let session = resources
        .auth_manager
        .issue_auth_session(&identity)
        .unwrap();

    let response = AxumTestRequest::post("/oauth/authorize/consent")
        .form(&[
            ("auth_session_token", session.as_str()),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "crm:read"),
            ("state", "abc"),
            ("code_challenge", challenge().as_str()),
            ("code_challenge_method", "S256"),
            ("decision", "deny"),
        ])
        .send(app)
        .await;

    assert_eq!(response.status(), 302);
    let location = response.header("location").unwrap();
    assert!(location.starts_with(REDIRECT_URI));
    assert!(location.contains("error=access_denied"));
    assert!(location.contains("state=abc"));
    assert!(!location.contains("code="));
}

#[tokio::test]
async fn test_consent_unknown_decision_rejected() {
    let (app, resources) = common::create_test_app().await;
    let user = common::seed_test_user(&resources).await;
    let client_id = register_client(&app).await;

    let identity = AuthenticatedIdentity::from_user(&user);
    let session = resources
        .auth_manager
        .issue_auth_session(&identity)
        .unwrap();

    // anything other than the documented allow/deny values is rejected
    // locally, never treated as a denial
    let response = AxumTestRequest::post("/oauth/authorize/consent")
        .form(&[
            ("auth_session_token", session.as_str()),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "crm:read"),
            ("state", "abc"),
            ("code_challenge", challenge().as_str()),
            ("code_challenge_method", "S256"),
            ("decision", "approve"),
        ])
        .send(app)
        .await;

    assert_eq!(response.status(), 400);
    assert!(response.text().contains("invalid_request"));
}

#[tokio::test]
async fn test_expired_authorization_code_rejected() {
    let (app, resources) = common::create_test_app().await;
    let user = common::seed_test_user(&resources).await;
    let client_id = register_client(&app).await;

    let verifier = common::generate_code_verifier();
    let now = Utc::now();
    let record = AuthorizationCodeRecord {
        code: "c".repeat(64),
        client_id: client_id.clone(),
        user_id: user.id,
        tenant_id: user.tenant_id,
        redirect_uri: REDIRECT_URI.to_owned(),
        scope: "crm:read".to_owned(),
        code_challenge: common::generate_code_challenge(&verifier),
        expires_at: now - Duration::seconds(1),
        created_at: now - Duration::seconds(301),
        used_at: None,
    };
    resources.database.store_auth_code(&record).await.unwrap();

    let response = AxumTestRequest::post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", record.code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ])
        .send(app)
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
    assert!(body["error_description"]
        .as_str()
        .unwrap()
        .contains("expired"));
}

#[tokio::test]
async fn test_expired_refresh_token_rejected() {
    let (app, resources) = common::create_test_app().await;
    let user = common::seed_test_user(&resources).await;
    let client_id = register_client(&app).await;

    let raw_token = "aged-but-well-formed-refresh-token-material";
    let now = Utc::now();
    let record = RefreshTokenRecord {
        token_hash: OAuth2AuthorizationServer::hash_refresh_token(raw_token),
        client_id: client_id.clone(),
        user_id: user.id,
        tenant_id: user.tenant_id,
        scope: "crm:read".to_owned(),
        expires_at: now - Duration::hours(1),
        created_at: now - Duration::days(8),
    };
    resources.database.store_refresh_token(&record).await.unwrap();

    let response = AxumTestRequest::post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", raw_token),
            ("client_id", client_id.as_str()),
        ])
        .send(app)
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
    assert!(body["error_description"]
        .as_str()
        .unwrap()
        .contains("expired"));
}

#[tokio::test]
async fn test_token_unsupported_grant_type() {
    let (app, _resources) = common::create_test_app().await;

    let response = AxumTestRequest::post("/oauth/token")
        .form(&[("grant_type", "client_credentials")])
        .send(app)
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");
}
