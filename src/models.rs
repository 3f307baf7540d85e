// ABOUTME: Core CRM identity models shared across the authorization server
// ABOUTME: Defines users, roles, and the identity claims carried into issued tokens
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2026 Meridian CRM

//! Common data models for the Meridian CRM authorization server.
//!
//! Only the identity slice of the CRM's data model lives here: the user
//! record the credential verifier reads, and the role enum carried into
//! every issued token. The CRM's CRUD resources (organizations, contacts,
//! deals, activities, notes) are owned by other services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role of a user inside their tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Full tenant administration
    Admin,
    /// Team management and reporting
    Manager,
    /// Standard sales representative
    Rep,
}

impl UserRole {
    /// Stable string form stored in the database and token claims
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Rep => "rep",
        }
    }

    /// Parse from the stored string form, defaulting unknown values to `Rep`
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            _ => Self::Rep,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A CRM user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: Uuid,
    /// Tenant this user belongs to
    pub tenant_id: Uuid,
    /// Login email (unique, matched case-insensitively)
    pub email: String,
    /// Optional display name
    pub display_name: Option<String>,
    /// Bcrypt hash of the user's password
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Role inside the tenant
    pub role: UserRole,
    /// Whether the account may authenticate
    pub is_active: bool,
    /// When the account was created
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new active user in the given tenant
    #[must_use]
    pub fn new(
        tenant_id: Uuid,
        email: String,
        password_hash: String,
        role: UserRole,
        display_name: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            email,
            display_name,
            password_hash,
            role,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
