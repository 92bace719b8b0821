//! Session lifecycle: issuance, validation, rotation and revocation
//!
//! A refresh token moves through `ISSUED -> CONSUMED` (rotation) or
//! `ISSUED -> GONE` (expiry, logout, revoke-all). No transition leaves a value
//! usable twice: rotation only proceeds for the caller whose delete actually
//! removed the stored record.

use super::jwt::{generate_refresh_value, TokenCodec, TokenError};
use super::repository::{RefreshTokenStore, StoreError, UserRepository};
use booktrade_core::Identity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Attempts at persisting a fresh refresh value before giving up
const MAX_ISSUE_ATTEMPTS: usize = 3;

/// Upper bound for refresh token lifetimes
const MAX_REFRESH_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Failed to issue token pair: {0}")]
    Issuance(String),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => SessionError::ExpiredToken,
            TokenError::Invalid => SessionError::InvalidToken,
            other => SessionError::Issuance(other.to_string()),
        }
    }
}

/// Access and refresh token handed to a client
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (Unix epoch seconds)
    pub access_expires_at: u64,
    /// Principal the pair was issued to
    #[serde(skip)]
    pub subject_id: Uuid,
}

impl TokenPair {
    /// Seconds until the access token expires, zero if already past
    pub fn expires_in(&self) -> u64 {
        let now = Utc::now().timestamp().max(0) as u64;
        self.access_expires_at.saturating_sub(now)
    }
}

/// Orchestrates the token codec, refresh token store and user lookup
pub struct SessionService {
    codec: TokenCodec,
    store: Arc<dyn RefreshTokenStore>,
    users: Arc<dyn UserRepository>,
    refresh_ttl: Duration,
}

impl SessionService {
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn UserRepository>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            store,
            users,
            refresh_ttl: refresh_ttl.min(MAX_REFRESH_TTL),
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn refresh_expiry(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.refresh_ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() + ttl
    }

    /// Issue a new access/refresh pair for `identity`
    ///
    /// The pair is only returned once the refresh value is persisted. A value
    /// collision is retried with a fresh value.
    ///
    /// # Arguments
    ///
    /// * `identity` - Authenticated principal; must have a non-nil id and a login
    ///
    /// # Returns
    ///
    /// * `Ok(TokenPair)` - Signed access token plus a stored refresh value
    /// * `Err(SessionError::Issuance)` - Signing or persistence failed; nothing
    ///   usable was handed out
    pub async fn issue_token_pair(&self, identity: &Identity) -> Result<TokenPair, SessionError> {
        if !identity.is_complete() {
            return Err(SessionError::Issuance("incomplete identity".to_string()));
        }

        let access = self
            .codec
            .issue_access(identity)
            .map_err(|e| SessionError::Issuance(e.to_string()))?;
        let expires_at = self.refresh_expiry();

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let refresh_token = generate_refresh_value();

            match self
                .store
                .save(identity.subject_id, &refresh_token, expires_at)
                .await
            {
                Ok(()) => {
                    return Ok(TokenPair {
                        access_token: access.token,
                        refresh_token,
                        access_expires_at: access.expires_at,
                        subject_id: identity.subject_id,
                    });
                }
                Err(StoreError::Conflict) => {
                    tracing::warn!(attempt, "Refresh token value collided, regenerating");
                }
                Err(e) => return Err(SessionError::Issuance(e.to_string())),
            }
        }

        Err(SessionError::Issuance(
            "refresh token value collided repeatedly".to_string(),
        ))
    }

    /// Verify an access token
    ///
    /// Expired and invalid tokens stay distinguishable.
    pub fn validate_access_token(&self, token: &str) -> Result<Identity, SessionError> {
        self.codec.verify_access(token).map_err(SessionError::from)
    }

    /// Exchange a refresh token for a brand-new pair
    ///
    /// The old value is consumed. When two callers race with the same value,
    /// only the one whose delete removed the record gets a pair.
    ///
    /// # Returns
    ///
    /// * `Ok(TokenPair)` - New pair for the value's owner
    /// * `Err(SessionError::InvalidRefreshToken)` - Unknown, expired or already
    ///   consumed value, or an owner that no longer exists
    /// * `Err(SessionError::Storage)` - The store could not be read
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pair = sessions.rotate_refresh_token(&old.refresh_token).await?;
    /// // `old.refresh_token` is now dead; hand `pair` back to the client
    /// ```
    pub async fn rotate_refresh_token(&self, old_value: &str) -> Result<TokenPair, SessionError> {
        if old_value.is_empty() {
            return Err(SessionError::InvalidRefreshToken);
        }

        let owner_id = match self.store.validate(old_value).await {
            Ok(owner_id) => owner_id,
            Err(StoreError::NotFoundOrExpired) => return Err(SessionError::InvalidRefreshToken),
            Err(e) => return Err(SessionError::Storage(e.to_string())),
        };

        let user = self
            .users
            .find_by_id(owner_id)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?
            .ok_or(SessionError::InvalidRefreshToken)?;
        let identity = user
            .identity()
            .map_err(|_| SessionError::InvalidRefreshToken)?;

        match self.store.delete(old_value).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(user_id = %owner_id, "Refresh token already consumed");
                return Err(SessionError::InvalidRefreshToken);
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %owner_id,
                    error = %e,
                    "Failed to delete consumed refresh token"
                );
            }
        }

        self.issue_token_pair(&identity).await
    }

    /// Revoke one session
    ///
    /// Fails with `InvalidRefreshToken` if the value was not a live session.
    pub async fn revoke(&self, refresh_value: &str) -> Result<(), SessionError> {
        let removed = self
            .store
            .delete(refresh_value)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        if removed {
            Ok(())
        } else {
            Err(SessionError::InvalidRefreshToken)
        }
    }

    /// Revoke every session of a principal, returning how many were live
    pub async fn revoke_all(&self, owner_id: Uuid) -> Result<u64, SessionError> {
        self.store
            .delete_by_owner(owner_id)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))
    }

    /// Delete expired refresh tokens
    pub async fn sweep_expired(&self) -> Result<u64, SessionError> {
        self.store
            .delete_expired()
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))
    }
}
