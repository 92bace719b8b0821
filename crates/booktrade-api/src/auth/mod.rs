//! Authentication and session management
//!
//! - Access token signing and verification (`jwt`)
//! - Password hashing with Argon2 (`password`)
//! - Refresh token and user storage (`repository`)
//! - Session lifecycle: issue, rotate, revoke (`session`)
//! - Registration and login (`service`)
//! - Bearer-token gate for protected routes (`middleware`)

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod session;

pub use jwt::{generate_refresh_value, AccessClaims, TokenCodec, TokenError};
pub use middleware::{auth_middleware, bearer_token};
pub use models::{RefreshTokenRecord, User, UserPublic};
pub use password::{
    hash_password, hash_password_with_config, validate_password_strength, verify_password,
    Argon2Verifier, CredentialVerifier, PasswordConfig, PasswordError,
};
pub use repository::{
    ensure_schema, CachedUserRepository, CachedUsers, InMemoryRefreshTokenStore,
    InMemoryUserRepository, PgRefreshTokenStore, PgUserRepository, RefreshTokenStore, StoreError,
    UserRepository,
};
pub use service::{AccountError, AuthService, LoginRequest, RegisterRequest};
pub use session::{SessionError, SessionService, TokenPair};
