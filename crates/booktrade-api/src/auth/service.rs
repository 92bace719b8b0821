//! Account use-cases
//!
//! Registration, login and current-user lookup. Token lifecycles are
//! delegated to [`SessionService`].

use super::models::User;
use super::password::{validate_password_strength, CredentialVerifier, PasswordError};
use super::repository::{StoreError, UserRepository};
use super::session::{SessionError, SessionService, TokenPair};
use booktrade_core::Identity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Page size used when a listing does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a listing may request
pub const MAX_PAGE_SIZE: u32 = 100;

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 64, message = "Login must be 3 to 64 characters"))]
    pub login: String,

    #[validate(email(message = "Invalid email address"))]
    pub email: String,

    pub password: String,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

/// Account errors
#[derive(Debug, Error)]
pub enum AccountError {
    /// Unknown login or wrong password; the two are never told apart
    #[error("Invalid login or password")]
    InvalidCredentials,

    #[error("Login is already taken")]
    LoginTaken,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("User not found")]
    UserNotFound,

    /// The caller may only act on their own account
    #[error("Not allowed to modify another account")]
    Forbidden,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Password error: {0}")]
    Password(#[from] PasswordError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => AccountError::LoginTaken,
            StoreError::NotFound => AccountError::UserNotFound,
            other => AccountError::Storage(other.to_string()),
        }
    }
}

/// Authentication service
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<SessionService>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<SessionService>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            users,
            sessions,
            verifier,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionService> {
        &self.sessions
    }

    /// Register a new user
    ///
    /// # Returns
    ///
    /// * `Ok(User)` - Newly created user
    /// * `Err(AccountError::Validation)` - Malformed login/email or weak password
    /// * `Err(AccountError::LoginTaken)` - Login already registered
    pub async fn register(&self, request: RegisterRequest) -> Result<User, AccountError> {
        request
            .validate()
            .map_err(|e| AccountError::Validation(e.to_string()))?;
        validate_password_strength(&request.password).map_err(AccountError::Validation)?;

        if self.users.find_by_login(&request.login).await?.is_some() {
            return Err(AccountError::LoginTaken);
        }

        let verifier = Arc::clone(&self.verifier);
        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || verifier.hash(&password))
            .await
            .map_err(|e| AccountError::Task(e.to_string()))??;

        let user = User::new(request.login, request.email, password_hash);
        let created = self.users.create(user).await?;

        tracing::info!(user_id = %created.id, login = %created.login, "User registered");
        Ok(created)
    }

    /// Authenticate and open a new session
    ///
    /// An unknown login still pays for a full hash verification, so response
    /// timing matches a wrong password.
    pub async fn login(&self, request: LoginRequest) -> Result<(TokenPair, User), AccountError> {
        let user = self.users.find_by_login(&request.login).await?;

        let verifier = Arc::clone(&self.verifier);
        let password = request.password;
        let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
        let verified = tokio::task::spawn_blocking(move || match stored_hash {
            Some(hash) => verifier.verify(&password, &hash),
            None => {
                verifier.verify_dummy(&password);
                Ok(false)
            }
        })
        .await
        .map_err(|e| AccountError::Task(e.to_string()))??;

        let user = match user {
            Some(user) if verified => user,
            _ => return Err(AccountError::InvalidCredentials),
        };

        let identity = user
            .identity()
            .map_err(|e| SessionError::Issuance(e.to_string()))?;
        let pair = self.sessions.issue_token_pair(&identity).await?;

        Ok((pair, user))
    }

    /// The stored account behind an authenticated identity
    pub async fn current_user(&self, identity: &Identity) -> Result<User, AccountError> {
        self.get_user(identity.subject_id).await
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, AccountError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or(AccountError::UserNotFound)
    }

    /// One page of users, newest first
    ///
    /// `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn list_users(&self, limit: u32, offset: u32) -> Result<Vec<User>, AccountError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        Ok(self.users.list(limit, offset).await?)
    }

    /// Delete an account and revoke every session it holds
    ///
    /// # Arguments
    ///
    /// * `caller` - Authenticated identity making the request
    /// * `id` - Account to delete; must be the caller's own
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of refresh tokens revoked
    /// * `Err(AccountError::Forbidden)` - `id` belongs to someone else
    /// * `Err(AccountError::UserNotFound)` - No such account
    pub async fn delete_account(&self, caller: &Identity, id: Uuid) -> Result<u64, AccountError> {
        if caller.subject_id != id {
            return Err(AccountError::Forbidden);
        }

        self.users.delete(id).await?;
        let revoked = self.sessions.revoke_all(id).await?;

        tracing::info!(user_id = %id, revoked, "Account deleted");
        Ok(revoked)
    }
}
