use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Roles for access control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid role specified")]
pub struct UnknownRole;

impl FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            _ => Err(UnknownRole),
        }
    }
}

/// User record. Credentials and pending tokens never leave the server.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub activation_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expiry: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Row as stored in Postgres; `role` is plain text there.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub activation_token: Option<String>,
    pub reset_token: Option<String>,
    pub reset_token_expiry: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role = r
            .role
            .parse::<UserRole>()
            .map_err(|_| anyhow::anyhow!("unknown role {:?} stored for user {}", r.role, r.id))?;
        Ok(Self {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            name: r.name,
            role,
            is_active: r.is_active,
            activation_token: r.activation_token,
            reset_token: r.reset_token,
            reset_token_expiry: r.reset_token_expiry,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Fields needed to insert a user; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub activation_token: Option<String>,
}

/// Profile fields an edit may change. `None` leaves the column as stored;
/// credentials and one-time tokens are never part of an edit.
#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub name: String,
    pub email: String,
    pub role: Option<UserRole>,
    /// Activating also drops any pending activation token.
    pub is_active: Option<bool>,
}
