//! Storage collaborators for authentication
//!
//! This module provides the data access layer for authentication entities:
//! - Refresh token persistence (`RefreshTokenStore`)
//! - User lookup and registration (`UserRepository`)
//!
//! Each capability has a PostgreSQL variant, an in-memory variant used by
//! tests and local runs, and (for users) a read-through caching decorator.

use super::models::{RefreshTokenRecord, User};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use booktrade_core::ExpiringCache;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key (refresh token value, login) already exists
    #[error("Record already exists")]
    Conflict,

    #[error("Refresh token not found or expired")]
    NotFoundOrExpired,

    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(err.to_string()),
        }
    }
}

// ============================================================================
// Refresh tokens
// ============================================================================

/// Persistence for opaque refresh token values
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert a new token; `Conflict` if the value is already present
    async fn save(
        &self,
        owner_id: Uuid,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Owner of an unexpired token, or `NotFoundOrExpired`
    async fn validate(&self, value: &str) -> Result<Uuid, StoreError>;

    /// Remove a token. Returns whether a record was actually removed.
    async fn delete(&self, value: &str) -> Result<bool, StoreError>;

    /// Remove every token of an owner, returning how many were removed
    async fn delete_by_owner(&self, owner_id: Uuid) -> Result<u64, StoreError>;

    /// Remove every expired token, returning how many were removed
    async fn delete_expired(&self) -> Result<u64, StoreError>;
}

/// In-memory refresh token store
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    records: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn save(
        &self,
        owner_id: Uuid,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(value) {
            return Err(StoreError::Conflict);
        }
        records.insert(
            value.to_string(),
            RefreshTokenRecord::new(owner_id, value.to_string(), expires_at),
        );
        Ok(())
    }

    async fn validate(&self, value: &str) -> Result<Uuid, StoreError> {
        let records = self.records.read().await;
        match records.get(value) {
            Some(record) if !record.is_expired() => Ok(record.owner_id),
            _ => Err(StoreError::NotFoundOrExpired),
        }
    }

    async fn delete(&self, value: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(value).is_some())
    }

    async fn delete_by_owner(&self, owner_id: Uuid) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.owner_id != owner_id);
        Ok((before - records.len()) as u64)
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}

/// PostgreSQL refresh token store
///
/// Rows are keyed by a SHA-256 digest of `pepper || value`, so a leaked
/// table does not hand out usable bearer secrets.
#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
    pepper: String,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool, pepper: impl Into<String>) -> Self {
        Self {
            pool,
            pepper: pepper.into(),
        }
    }

    fn digest(&self, value: &str) -> String {
        token_digest(&self.pepper, value)
    }
}

/// Salted SHA-256 digest of a refresh token value, URL-safe base64
pub fn token_digest(pepper: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(value.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn save(
        &self,
        owner_id: Uuid,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (owner_id, token_digest, expires_at, created_at) \
             VALUES ($1, $2, $3, NOW())",
        )
        .bind(owner_id)
        .bind(self.digest(value))
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn validate(&self, value: &str) -> Result<Uuid, StoreError> {
        let owner: Option<(Uuid,)> = sqlx::query_as(
            "SELECT owner_id FROM refresh_tokens WHERE token_digest = $1 AND expires_at > NOW()",
        )
        .bind(self.digest(value))
        .fetch_optional(&self.pool)
        .await?;

        owner
            .map(|(owner_id,)| owner_id)
            .ok_or(StoreError::NotFoundOrExpired)
    }

    async fn delete(&self, value: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_digest = $1")
            .bind(self.digest(value))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_owner(&self, owner_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Create the `users` and `refresh_tokens` tables if they do not exist
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    const STATEMENTS: [&str; 4] = [
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            login TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            token_digest TEXT PRIMARY KEY,
            owner_id UUID NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS refresh_tokens_owner_idx ON refresh_tokens (owner_id)",
        "CREATE INDEX IF NOT EXISTS refresh_tokens_expires_idx ON refresh_tokens (expires_at)",
    ];

    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

// ============================================================================
// Users
// ============================================================================

/// User lookup and registration
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;

    /// Persist a new user; `Conflict` if the login is taken
    async fn create(&self, user: User) -> Result<User, StoreError>;

    /// Remove a user; `NotFound` if there was none
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Users ordered by creation time, newest first
    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<User>, StoreError>;
}

/// In-memory user repository
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.login == login)
            .cloned())
    }

    async fn create(&self, user: User) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || users.values().any(|u| u.login == user.login) {
            return Err(StoreError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

/// PostgreSQL user repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, login, email, password_hash, created_at, updated_at";

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE login = $1"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create(&self, user: User) -> Result<User, StoreError> {
        sqlx::query(
            "INSERT INTO users (id, login, email, password_hash, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id)
        .bind(&user.login)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

/// Value stored in the user cache
#[derive(Debug, Clone)]
pub enum CachedUsers {
    One(User),
    Page(Vec<User>),
}

const LIST_PREFIX: &str = "users:list:";

fn id_key(id: Uuid) -> String {
    format!("users:id:{id}")
}

fn login_key(login: &str) -> String {
    format!("users:login:{login}")
}

fn list_key(limit: u32, offset: u32) -> String {
    format!("{LIST_PREFIX}{limit}:{offset}")
}

/// Read-through caching decorator over any [`UserRepository`]
///
/// Hits are served from the cache; misses fall through and are not cached.
/// Writes invalidate the affected entries and every cached listing.
pub struct CachedUserRepository<R> {
    inner: R,
    cache: ExpiringCache<CachedUsers>,
    ttl: Duration,
}

impl<R: UserRepository> CachedUserRepository<R> {
    pub fn new(inner: R, cache: ExpiringCache<CachedUsers>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    pub fn cache(&self) -> &ExpiringCache<CachedUsers> {
        &self.cache
    }

    fn remember(&self, user: &User) {
        self.cache
            .set(id_key(user.id), CachedUsers::One(user.clone()), self.ttl);
        self.cache
            .set(login_key(&user.login), CachedUsers::One(user.clone()), self.ttl);
    }

    fn forget(&self, user: &User) {
        self.cache.delete(&id_key(user.id));
        self.cache.delete(&login_key(&user.login));
    }
}

#[async_trait]
impl<R: UserRepository> UserRepository for CachedUserRepository<R> {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        if let Some(CachedUsers::One(user)) = self.cache.get(&id_key(id)) {
            return Ok(Some(user));
        }

        let user = self.inner.find_by_id(id).await?;
        if let Some(ref u) = user {
            self.remember(u);
        }
        Ok(user)
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        if let Some(CachedUsers::One(user)) = self.cache.get(&login_key(login)) {
            return Ok(Some(user));
        }

        let user = self.inner.find_by_login(login).await?;
        if let Some(ref u) = user {
            self.remember(u);
        }
        Ok(user)
    }

    async fn create(&self, user: User) -> Result<User, StoreError> {
        let created = self.inner.create(user).await?;
        self.forget(&created);
        self.cache.delete_pattern(LIST_PREFIX);
        Ok(created)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let existing = self.inner.find_by_id(id).await?;
        self.inner.delete(id).await?;

        self.cache.delete(&id_key(id));
        if let Some(user) = existing {
            self.forget(&user);
        }
        self.cache.delete_pattern(LIST_PREFIX);
        Ok(())
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<User>, StoreError> {
        let key = list_key(limit, offset);
        if let Some(CachedUsers::Page(users)) = self.cache.get(&key) {
            return Ok(users);
        }

        let users = self.inner.list(limit, offset).await?;
        self.cache.set(key, CachedUsers::Page(users.clone()), self.ttl);
        Ok(users)
    }
}
