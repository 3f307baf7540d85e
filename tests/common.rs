// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides database, resource, user seeding, and PKCE helpers
#![allow(dead_code)]

//! Shared test utilities for `meridian_crm_server` integration tests.

use base64::{engine::general_purpose, Engine as _};
use meridian_crm_server::{
    auth::AuthManager,
    config::environment::{
        AuthConfig, DatabaseConfig, DatabaseUrl, LogLevel, OAuth2ServerConfig, ServerConfig,
    },
    database::Database,
    models::{User, UserRole},
    routes::{build_router, ServerResources},
};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Once};
use uuid::Uuid;

/// Signing secret used by every test
pub const TEST_JWT_SECRET: &str = "a-test-secret-at-least-32-bytes-long!!";

/// Default seeded user credentials
pub const TEST_EMAIL: &str = "rep@acme.example";
pub const TEST_PASSWORD: &str = "hunter2hunter2";

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .init();
    });
}

/// Build a config pointing at an in-memory database
pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 8081,
        log_level: LogLevel::Info,
        database: DatabaseConfig {
            url: DatabaseUrl::Memory,
        },
        auth: AuthConfig {
            jwt_secret: TEST_JWT_SECRET.to_owned(),
        },
        oauth2: OAuth2ServerConfig {
            issuer_url: "http://localhost:8081".to_owned(),
        },
    }
}

/// Full server resources backed by a fresh in-memory database
pub async fn create_test_resources() -> Arc<ServerResources> {
    init_test_logging();

    let database = Arc::new(
        Database::new("sqlite::memory:")
            .await
            .expect("test database"),
    );
    let auth_manager = Arc::new(AuthManager::new(TEST_JWT_SECRET.as_bytes()));

    Arc::new(ServerResources::new(
        database,
        auth_manager,
        Arc::new(test_config()),
    ))
}

/// The application router plus its resources, for HTTP-level tests
pub async fn create_test_app() -> (axum::Router, Arc<ServerResources>) {
    let resources = create_test_resources().await;
    (build_router(resources.clone()), resources)
}

/// Seed an active user with the default test credentials.
///
/// Uses a low bcrypt cost to keep the suite fast.
pub async fn seed_test_user(resources: &ServerResources) -> User {
    seed_user(resources, TEST_EMAIL, TEST_PASSWORD, true).await
}

/// Seed a user with explicit credentials and active flag
pub async fn seed_user(
    resources: &ServerResources,
    email: &str,
    password: &str,
    is_active: bool,
) -> User {
    let mut user = User::new(
        Uuid::new_v4(),
        email.to_owned(),
        bcrypt::hash(password, 4).expect("bcrypt hash"),
        UserRole::Rep,
        Some("Test Rep".to_owned()),
    );
    user.is_active = is_active;

    resources
        .database
        .create_user(&user)
        .await
        .expect("seed user");
    user
}

/// Generate a random PKCE code verifier (43 chars, base64url)
pub fn generate_code_verifier() -> String {
    let bytes: [u8; 32] = rand::random();
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Derive the S256 code challenge for a verifier
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}
