// ABOUTME: Server resource container and top-level router assembly
// ABOUTME: Wires health checks and the OAuth 2.1 authorization server into one axum app
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

use crate::auth::AuthManager;
use crate::config::environment::ServerConfig;
use crate::database::Database;
use crate::oauth2_server::{OAuth2AuthorizationServer, OAuth2ServerRoutes};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

/// Shared resources handed to every route handler
pub struct ServerResources {
    /// Database handle
    pub database: Arc<Database>,
    /// Token signing and verification
    pub auth_manager: Arc<AuthManager>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// OAuth 2.1 protocol core
    pub oauth2_server: OAuth2AuthorizationServer,
}

impl ServerResources {
    /// Assemble the resource container
    #[must_use]
    pub fn new(
        database: Arc<Database>,
        auth_manager: Arc<AuthManager>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let oauth2_server =
            OAuth2AuthorizationServer::new(database.clone(), auth_manager.clone());

        Self {
            database,
            auth_manager,
            config,
            oauth2_server,
        }
    }
}

/// Health check routes
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create health check routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/health", get(Self::handle_health))
            .with_state(resources)
    }

    async fn handle_health(
        State(resources): State<Arc<ServerResources>>,
    ) -> impl IntoResponse {
        // A failing pool makes the health endpoint say so rather than lie
        let database_ok = sqlx::query("SELECT 1")
            .execute(resources.database.pool())
            .await
            .is_ok();

        Json(serde_json::json!({
            "status": if database_ok { "ok" } else { "degraded" },
            "service": crate::logging::SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "database": if database_ok { "ok" } else { "unavailable" },
        }))
    }
}

/// Build the complete application router
#[must_use]
pub fn build_router(resources: Arc<ServerResources>) -> Router {
    HealthRoutes::routes(resources.clone()).merge(OAuth2ServerRoutes::routes(resources))
}
