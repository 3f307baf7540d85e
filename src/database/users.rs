// ABOUTME: User account persistence - schema, inserts, and credential lookups
// ABOUTME: Email lookups are case-insensitive to match login behavior
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{User, UserRole};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> AppResult<User> {
    let id: String = row.try_get("id")?;
    let tenant_id: String = row.try_get("tenant_id")?;
    let role: String = row.try_get("role")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(User {
        id: Uuid::parse_str(&id)
            .map_err(|e| AppError::database(format!("invalid user id in database: {e}")))?,
        tenant_id: Uuid::parse_str(&tenant_id)
            .map_err(|e| AppError::database(format!("invalid tenant id in database: {e}")))?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        password_hash: row.try_get("password_hash")?,
        role: UserRole::from_str_or_default(&role),
        is_active: row.try_get("is_active")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| AppError::database(format!("invalid created_at in database: {e}")))?
            .with_timezone(&Utc),
    })
}

impl Database {
    pub(super) async fn migrate_users(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'rep',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_tenant ON users(tenant_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a new user account
    ///
    /// # Errors
    /// Returns an error if the email is already taken or the insert fails
    pub async fn create_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, tenant_id, email, display_name, password_hash, role, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(user.id.to_string())
        .bind(user.tenant_id.to_string())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a user by email, case-insensitively
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is corrupt
    pub async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    /// Look up a user by `ID`
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is corrupt
    pub async fn get_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }
}
