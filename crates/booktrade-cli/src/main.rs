//! booktrade CLI - Session administration
//!
//! Usage:
//!   booktrade hash-password <password>
//!   booktrade sweep-tokens
//!   booktrade revoke-user <user-id>
//!   booktrade check-config [--config <file>]

use anyhow::Context;
use booktrade_api::auth::{ensure_schema, hash_password, validate_password_strength};
use booktrade_api::state::AppState;
use booktrade_core::AppConfig;
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "booktrade")]
#[command(about = "booktrade session administration")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash a password with the server's Argon2 parameters
    HashPassword {
        /// Plaintext password
        password: String,
    },
    /// Delete expired refresh tokens
    SweepTokens,
    /// Revoke every refresh token a user holds
    RevokeUser {
        /// User ID
        user_id: Uuid,
    },
    /// Validate configuration and report weak settings
    CheckConfig,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(&path)
            .with_context(|| format!("reading {}", path.display()))?
            .with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url)
        .await
        .context("connecting to database")?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Services over the durable stores, wired the same way as the API server
async fn open_state(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = connect(&config).await?;
    Ok(AppState::postgres(config, pool)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::HashPassword { password } => {
            if let Err(reason) = validate_password_strength(&password) {
                tracing::warn!("{}", reason);
            }
            println!("{}", hash_password(&password)?);
        }
        Commands::SweepTokens => {
            let state = open_state(load_config(cli.config)?).await?;
            let removed = state.sessions.sweep_expired().await?;
            println!("Removed {} expired refresh tokens", removed);
        }
        Commands::RevokeUser { user_id } => {
            let state = open_state(load_config(cli.config)?).await?;
            let revoked = state.sessions.revoke_all(user_id).await?;
            println!("Revoked {} refresh tokens for {}", revoked, user_id);
        }
        Commands::CheckConfig => {
            let config = load_config(cli.config)?;
            println!(
                "Listening on {}:{}",
                config.server.host, config.server.port
            );
            println!(
                "Access TTL {}s, refresh TTL {}s, sweep every {}s",
                config.auth.access_ttl_secs,
                config.auth.refresh_ttl_secs,
                config.auth.sweep_interval_secs
            );

            let weak = config.auth.weak_secrets();
            if weak.is_empty() {
                println!("Signing secrets OK");
            } else {
                for name in &weak {
                    println!("WARNING: {} is shorter than the recommended length", name);
                }
            }
            if config.auth.uses_development_secrets() {
                println!("WARNING: built-in development secrets are in use");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_revoke_user() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["booktrade", "revoke-user", &id.to_string()]).unwrap();
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Commands::RevokeUser { user_id } if user_id == id));
    }

    #[test]
    fn test_parse_rejects_bad_user_id() {
        assert!(Cli::try_parse_from(["booktrade", "revoke-user", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_parse_global_config_flag() {
        let cli = Cli::try_parse_from(["booktrade", "sweep-tokens", "--config", "booktrade.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("booktrade.toml")));
        assert!(matches!(cli.command, Commands::SweepTokens));
    }

    #[test]
    fn test_load_config_from_file() {
        let path = std::env::temp_dir().join(format!("booktrade-cli-{}.toml", Uuid::new_v4()));
        std::fs::write(&path, "[server]\nport = 9100\n").unwrap();

        let config = load_config(Some(path.clone())).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.server.port, 9100);
    }
}
