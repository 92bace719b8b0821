//! Database models for authentication
//!
//! - User: account and credentials
//! - RefreshTokenRecord: a persisted refresh token
//!
//! These map to the `users` and `refresh_tokens` tables.

use booktrade_core::{CoreError, Identity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// User account model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user identifier
    pub id: Uuid,

    /// Login name (unique, used for authentication)
    pub login: String,

    /// Contact email
    pub email: String,

    /// Argon2id PHC hash, never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with a fresh identifier
    pub fn new(login: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            login,
            email,
            password_hash,
            created_at: now,
            updated_at: now,
        }
    }

    /// The principal to embed in tokens for this user
    pub fn identity(&self) -> Result<Identity, CoreError> {
        Identity::new(self.id, self.login.clone())
    }

    /// Convert to the public representation (without the password hash)
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            login: self.login.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

/// Public user representation (safe for API responses)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserPublic {
    pub id: Uuid,
    pub login: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted refresh token
///
/// `token_digest` is whatever the owning store keys rows by: the raw value
/// for the in-memory store, a salted SHA-256 digest for PostgreSQL.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub owner_id: Uuid,
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(owner_id: Uuid, token_digest: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            token_digest,
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Whether the token is past its expiry
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
