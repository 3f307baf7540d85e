// ABOUTME: SQLite database access layer for users and OAuth 2.1 server state
// ABOUTME: Owns the connection pool, schema migrations, and per-domain query modules
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! Database abstraction over `SQLite` via `sqlx`.
//!
//! One [`Database`] handle owns the pool; query methods are grouped per
//! domain in submodules (`users`, `oauth2_server`). Timestamps are stored
//! as RFC 3339 `TEXT` and list-valued columns as `JSON` arrays in `TEXT`.

use crate::errors::AppResult;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// OAuth 2.1 server state queries (clients, codes, refresh tokens)
pub mod oauth2_server;
/// User account queries
pub mod users;

/// Database handle shared across the server
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if necessary) the database at the given `sqlite:` URL
    /// and run migrations.
    ///
    /// In-memory databases are pooled with a single connection so every
    /// query sees the same database instance.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid, the database cannot be
    /// opened, or migrations fail
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let database = Self { pool };
        database.migrate().await?;

        Ok(database)
    }

    /// Run all schema migrations (idempotent)
    ///
    /// # Errors
    /// Returns an error if any `DDL` statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_users().await?;
        self.migrate_oauth2_server().await?;
        tracing::debug!("database migrations complete");
        Ok(())
    }

    /// Access the underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) async fn create_test_db() -> Database {
    Database::new("sqlite::memory:")
        .await
        .expect("test database")
}
