// ABOUTME: Server binary for the Meridian CRM embedded OAuth 2.1 authorization server
// ABOUTME: Loads configuration, runs migrations, and serves the axum application
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! # Meridian CRM Authorization Server Binary
//!
//! Starts the embedded OAuth 2.1 authorization server: client registration,
//! browser login and consent, PKCE code exchange, and refresh rotation.

use anyhow::Result;
use clap::Parser;
use meridian_crm_server::{
    auth::AuthManager,
    config::environment::ServerConfig,
    database::Database,
    logging,
    routes::{build_router, ServerResources},
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "meridian-crm-server")]
#[command(about = "Meridian CRM - embedded OAuth 2.1 authorization server")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle container environments where clap may not work properly
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Argument parsing failed: {e}");
            eprintln!("Using default configuration");
            Args { http_port: None }
        }
    };

    // Load configuration from environment
    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    // Initialize production logging
    logging::init_from_env()?;

    info!("{}", config.summary());

    // Initialize database and run migrations
    let database = Arc::new(
        Database::new(&config.database.url.to_connection_string())
            .await
            .map_err(|e| anyhow::anyhow!("database initialization failed: {e}"))?,
    );
    info!(
        "Database initialized: {}",
        config.database.url.to_connection_string()
    );

    // Initialize authentication manager with the injected signing secret
    let auth_manager = Arc::new(AuthManager::new(config.auth.jwt_secret.as_bytes()));
    info!("Authentication manager initialized");

    let http_port = config.http_port;
    let resources = Arc::new(ServerResources::new(
        database,
        auth_manager,
        Arc::new(config),
    ));

    let app = build_router(resources);

    display_available_endpoints(http_port);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await?;
    info!("Server listening on port {}", http_port);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Display all available endpoints at startup
fn display_available_endpoints(http_port: u16) {
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());

    info!("=== Available Endpoints ===");
    info!("  POST http://{host}:{http_port}/oauth/register - Dynamic client registration (RFC 7591)");
    info!("  GET  http://{host}:{http_port}/oauth/authorize - Authorization endpoint (login page)");
    info!("  POST http://{host}:{http_port}/oauth/authorize - Login form submission");
    info!("  POST http://{host}:{http_port}/oauth/authorize/consent - Consent decision");
    info!("  POST http://{host}:{http_port}/oauth/token - Token endpoint (code exchange, refresh)");
    info!("  GET  http://{host}:{http_port}/.well-known/oauth-authorization-server - Server metadata (RFC 8414)");
    info!("  GET  http://{host}:{http_port}/.well-known/oauth-protected-resource - Resource metadata (RFC 9728)");
    info!("  GET  http://{host}:{http_port}/health - Health check");
}
