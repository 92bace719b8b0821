//! booktrade core - identity types, shared errors, configuration and caching
//!
//! This crate holds the pieces of the session/identity core that do not
//! depend on HTTP or on a database:
//! - `Identity`, the principal carried inside access tokens
//! - Common error types
//! - Configuration management
//! - The expiring in-memory cache used for read-through lookups

pub mod cache;
pub mod config;

pub use cache::{CacheStatsSnapshot, ExpiringCache};
pub use config::{
    AppConfig, AuthConfig, CacheConfig, ConfigError, DatabaseConfig, LoggingConfig, ServerConfig,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// Identity
// ============================================================================

/// The minimal principal carried in access tokens
///
/// Immutable once issued. A nil `subject_id` or an empty `login` is never a
/// valid identity; construct through [`Identity::new`] to enforce that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque subject identifier (user ID)
    pub subject_id: Uuid,
    /// Login name
    pub login: String,
}

impl Identity {
    /// Build an identity, rejecting zero-valued fields
    pub fn new(subject_id: Uuid, login: impl Into<String>) -> Result<Self> {
        let login = login.into();
        if subject_id.is_nil() {
            return Err(CoreError::InvalidIdentity(
                "subject id must not be nil".to_string(),
            ));
        }
        if login.is_empty() {
            return Err(CoreError::InvalidIdentity(
                "login must not be empty".to_string(),
            ));
        }
        Ok(Self { subject_id, login })
    }

    /// Whether both required fields carry non-zero values
    pub fn is_complete(&self) -> bool {
        !self.subject_id.is_nil() && !self.login.is_empty()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.login, self.subject_id)
    }
}
