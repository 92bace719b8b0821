//! Application state management

use crate::auth::{
    Argon2Verifier, AuthService, CachedUserRepository, CachedUsers, CredentialVerifier,
    InMemoryRefreshTokenStore, InMemoryUserRepository, PasswordConfig, PasswordError,
    PgRefreshTokenStore, PgUserRepository, RefreshTokenStore, SessionService, TokenCodec,
    UserRepository,
};
use booktrade_core::{AppConfig, ExpiringCache};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Token issuance, rotation and revocation
    pub sessions: Arc<SessionService>,
    /// Registration, login and profile lookup
    pub accounts: Arc<AuthService>,
    /// Read-through cache in front of the user repository
    pub user_cache: ExpiringCache<CachedUsers>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services over the given storage collaborators
    pub fn assemble<R>(
        config: AppConfig,
        store: Arc<dyn RefreshTokenStore>,
        users: R,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self
    where
        R: UserRepository + 'static,
    {
        let user_cache = ExpiringCache::new(config.cache.default_ttl());
        let users: Arc<dyn UserRepository> = Arc::new(CachedUserRepository::new(
            users,
            user_cache.clone(),
            config.cache.default_ttl(),
        ));

        let sessions = Arc::new(SessionService::new(
            TokenCodec::new(&config.auth),
            store,
            Arc::clone(&users),
            config.auth.refresh_ttl(),
        ));
        let accounts = Arc::new(AuthService::new(users, Arc::clone(&sessions), verifier));

        Self {
            config,
            sessions,
            accounts,
            user_cache,
            start_time: Instant::now(),
        }
    }

    /// State backed by PostgreSQL
    pub fn postgres(config: AppConfig, pool: PgPool) -> Result<Self, PasswordError> {
        let verifier = Arc::new(Argon2Verifier::new(PasswordConfig::default())?);
        let store = Arc::new(PgRefreshTokenStore::new(
            pool.clone(),
            config.auth.refresh_secret.clone(),
        ));
        Ok(Self::assemble(
            config,
            store,
            PgUserRepository::new(pool),
            verifier,
        ))
    }

    /// State backed by in-process stores, for tests and local runs
    pub fn in_memory(config: AppConfig, password: PasswordConfig) -> Result<Self, PasswordError> {
        let verifier = Arc::new(Argon2Verifier::new(password)?);
        Ok(Self::assemble(
            config,
            Arc::new(InMemoryRefreshTokenStore::new()),
            InMemoryUserRepository::new(),
            verifier,
        ))
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_state_wires_shared_cache() {
        let state = AppState::in_memory(AppConfig::default(), PasswordConfig::light()).unwrap();
        assert!(state.user_cache.is_enabled());
        assert!(state.user_cache.is_empty());

        let user = state
            .accounts
            .register(crate::auth::RegisterRequest {
                login: "bookworm".to_string(),
                email: "bookworm@example.com".to_string(),
                password: "Dostoevsky#1821".to_string(),
            })
            .await
            .unwrap();

        state
            .accounts
            .current_user(&user.identity().unwrap())
            .await
            .unwrap();
        assert!(!state.user_cache.is_empty());
    }
}
