// ABOUTME: OAuth 2.1 server persistence - clients, authorization codes, refresh tokens
// ABOUTME: Single-use semantics are enforced with conditional writes checked by rows_affected
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! OAuth 2.1 server state queries.
//!
//! The two security-critical operations here are [`Database::consume_auth_code`]
//! and [`Database::rotate_refresh_token`]. Both rely on conditional writes
//! whose `rows_affected` count decides whether this caller won the race, so
//! concurrent redemptions of the same artifact cannot both succeed.

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::oauth2_server::models::{AuthorizationCodeRecord, OAuth2Client, RefreshTokenRecord};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

fn parse_rfc3339(value: &str, column: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("invalid {column} in database: {e}")))
}

fn parse_uuid(value: &str, column: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| AppError::database(format!("invalid {column} in database: {e}")))
}

fn parse_string_list(value: &str, column: &str) -> AppResult<Vec<String>> {
    serde_json::from_str(value)
        .map_err(|e| AppError::database(format!("invalid {column} in database: {e}")))
}

fn row_to_client(row: &sqlx::sqlite::SqliteRow) -> AppResult<OAuth2Client> {
    let redirect_uris: String = row.try_get("redirect_uris")?;
    let grant_types: String = row.try_get("grant_types")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(OAuth2Client {
        client_id: row.try_get("client_id")?,
        client_name: row.try_get("client_name")?,
        redirect_uris: parse_string_list(&redirect_uris, "redirect_uris")?,
        grant_types: parse_string_list(&grant_types, "grant_types")?,
        created_at: parse_rfc3339(&created_at, "created_at")?,
    })
}

fn row_to_auth_code(row: &sqlx::sqlite::SqliteRow) -> AppResult<AuthorizationCodeRecord> {
    let user_id: String = row.try_get("user_id")?;
    let tenant_id: String = row.try_get("tenant_id")?;
    let expires_at: String = row.try_get("expires_at")?;
    let created_at: String = row.try_get("created_at")?;
    let used_at: Option<String> = row.try_get("used_at")?;

    Ok(AuthorizationCodeRecord {
        code: row.try_get("code")?,
        client_id: row.try_get("client_id")?,
        user_id: parse_uuid(&user_id, "user_id")?,
        tenant_id: parse_uuid(&tenant_id, "tenant_id")?,
        redirect_uri: row.try_get("redirect_uri")?,
        scope: row.try_get("scope")?,
        code_challenge: row.try_get("code_challenge")?,
        expires_at: parse_rfc3339(&expires_at, "expires_at")?,
        created_at: parse_rfc3339(&created_at, "created_at")?,
        used_at: used_at
            .as_deref()
            .map(|v| parse_rfc3339(v, "used_at"))
            .transpose()?,
    })
}

fn row_to_refresh_token(row: &sqlx::sqlite::SqliteRow) -> AppResult<RefreshTokenRecord> {
    let user_id: String = row.try_get("user_id")?;
    let tenant_id: String = row.try_get("tenant_id")?;
    let expires_at: String = row.try_get("expires_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(RefreshTokenRecord {
        token_hash: row.try_get("token_hash")?,
        client_id: row.try_get("client_id")?,
        user_id: parse_uuid(&user_id, "user_id")?,
        tenant_id: parse_uuid(&tenant_id, "tenant_id")?,
        scope: row.try_get("scope")?,
        expires_at: parse_rfc3339(&expires_at, "expires_at")?,
        created_at: parse_rfc3339(&created_at, "created_at")?,
    })
}

impl Database {
    pub(super) async fn migrate_oauth2_server(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS oauth2_clients (
                client_id TEXT PRIMARY KEY,
                client_name TEXT NOT NULL,
                redirect_uris TEXT NOT NULL,
                grant_types TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS oauth2_auth_codes (
                code TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                scope TEXT NOT NULL,
                code_challenge TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                used_at TEXT
            )
            ",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS oauth2_refresh_tokens (
                token_hash TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_oauth2_auth_codes_client ON oauth2_auth_codes(client_id)",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_oauth2_refresh_tokens_user ON oauth2_refresh_tokens(user_id)",
        )
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Store a newly registered client
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn store_oauth2_client(&self, client: &OAuth2Client) -> AppResult<()> {
        let redirect_uris = serde_json::to_string(&client.redirect_uris)
            .map_err(|e| AppError::internal(format!("redirect_uris serialization: {e}")))?;
        let grant_types = serde_json::to_string(&client.grant_types)
            .map_err(|e| AppError::internal(format!("grant_types serialization: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO oauth2_clients (client_id, client_name, redirect_uris, grant_types, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&client.client_id)
        .bind(&client.client_name)
        .bind(redirect_uris)
        .bind(grant_types)
        .bind(client.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Look up a registered client by `client_id`
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is corrupt
    pub async fn get_oauth2_client(&self, client_id: &str) -> AppResult<Option<OAuth2Client>> {
        let row = sqlx::query("SELECT * FROM oauth2_clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_client).transpose()
    }

    /// Store a freshly minted authorization code
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn store_auth_code(&self, code: &AuthorizationCodeRecord) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth2_auth_codes
                (code, client_id, user_id, tenant_id, redirect_uri, scope, code_challenge, expires_at, created_at, used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL)
            ",
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(code.user_id.to_string())
        .bind(code.tenant_id.to_string())
        .bind(&code.redirect_uri)
        .bind(&code.scope)
        .bind(&code.code_challenge)
        .bind(code.expires_at.to_rfc3339())
        .bind(code.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Fetch an authorization code row regardless of its used state
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is corrupt
    pub async fn get_auth_code(&self, code: &str) -> AppResult<Option<AuthorizationCodeRecord>> {
        let row = sqlx::query("SELECT * FROM oauth2_auth_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_auth_code).transpose()
    }

    /// Atomically mark an authorization code as used.
    ///
    /// The conditional `UPDATE ... WHERE used_at IS NULL` means exactly one
    /// concurrent caller can win; everyone else observes zero rows affected.
    /// Returns the code record when this caller won, `None` when the code
    /// does not exist or was already consumed (the caller attributes which
    /// by re-fetching with [`Database::get_auth_code`]).
    ///
    /// # Errors
    /// Returns an error if the write or the follow-up fetch fails
    pub async fn consume_auth_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<AuthorizationCodeRecord>> {
        let result =
            sqlx::query("UPDATE oauth2_auth_codes SET used_at = $1 WHERE code = $2 AND used_at IS NULL")
                .bind(now.to_rfc3339())
                .bind(code)
                .execute(self.pool())
                .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_auth_code(code).await
    }

    /// Store a refresh token record (hash at rest, never the raw token)
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn store_refresh_token(&self, token: &RefreshTokenRecord) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth2_refresh_tokens
                (token_hash, client_id, user_id, tenant_id, scope, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&token.token_hash)
        .bind(&token.client_id)
        .bind(token.user_id.to_string())
        .bind(token.tenant_id.to_string())
        .bind(&token.scope)
        .bind(token.expires_at.to_rfc3339())
        .bind(token.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Fetch a refresh token record by its hash
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is corrupt
    pub async fn get_refresh_token(
        &self,
        token_hash: &str,
    ) -> AppResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query("SELECT * FROM oauth2_refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_refresh_token).transpose()
    }

    /// Atomically rotate a refresh token: delete the presented one and insert
    /// its replacement in a single transaction.
    ///
    /// The delete is conditional on client binding and expiry, so a token
    /// that is expired, bound to another client, or already rotated leaves
    /// zero rows affected and the transaction inserts nothing. Returns the
    /// old record on success, `None` when this caller lost (the caller
    /// attributes why via [`Database::get_refresh_token`]).
    ///
    /// # Errors
    /// Returns an error if any statement in the transaction fails
    pub async fn rotate_refresh_token(
        &self,
        presented_hash: &str,
        client_id: &str,
        now: DateTime<Utc>,
        replacement: &RefreshTokenRecord,
    ) -> AppResult<Option<RefreshTokenRecord>> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM oauth2_refresh_tokens WHERE token_hash = $1")
            .bind(presented_hash)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(old) = row.as_ref().map(row_to_refresh_token).transpose()? else {
            tx.rollback().await?;
            return Ok(None);
        };

        if old.client_id != client_id || old.is_expired(now) {
            tx.rollback().await?;
            return Ok(None);
        }

        let deleted = sqlx::query("DELETE FROM oauth2_refresh_tokens WHERE token_hash = $1")
            .bind(presented_hash)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r"
            INSERT INTO oauth2_refresh_tokens
                (token_hash, client_id, user_id, tenant_id, scope, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&replacement.token_hash)
        .bind(&replacement.client_id)
        .bind(replacement.user_id.to_string())
        .bind(replacement.tenant_id.to_string())
        .bind(&replacement.scope)
        .bind(replacement.expires_at.to_rfc3339())
        .bind(replacement.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(old))
    }
}
