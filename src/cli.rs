//! CLI argument parsing, validation, and startup helpers.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::auth::AuthCore;
use crate::config::{AuthConfig, MIN_SECRET_LENGTH};
use crate::db::{DEFAULT_MAX_RETRIES, Database, DatabaseOptions};

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "worklog", about = "Token and session core of the worklog backend")]
pub struct Args {
    /// Path to the primary SQLite database file
    #[arg(short, long, default_value = "worklog.db", global = true)]
    pub database: PathBuf,

    /// Read-only replica to serve reads from (defaults to the primary)
    #[arg(long, global = true)]
    pub read_replica: Option<PathBuf>,

    /// Retries for a write transaction that hit a serialization conflict
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, global = true)]
    pub max_retries: u32,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long, global = true)]
    pub jwt_secret_file: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run cleanup on a schedule until interrupted (default)
    Serve,
    /// Run one cleanup pass and exit
    Cleanup,
    /// Check that both connection pools answer, then exit
    Check {
        /// Seconds to wait for the database
        #[arg(long, default_value = "5")]
        timeout: u64,
    },
    /// Deactivate every session of a user
    RevokeUser { user_id: String },
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Build the auth configuration, logging errors if the secret is rejected.
pub fn build_auth_config(secret: String) -> Option<AuthConfig> {
    match AuthConfig::new(secret.into_bytes()) {
        Ok(config) => Some(config),
        Err(e) => {
            error!(error = %e, "Invalid auth configuration");
            None
        }
    }
}

pub fn database_options(args: &Args) -> DatabaseOptions {
    let options = DatabaseOptions::new(&args.database).with_max_retries(args.max_retries);
    match &args.read_replica {
        Some(replica) => options.with_read_replica(replica),
        None => options,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(options: &DatabaseOptions) -> Option<Database> {
    match Database::open(options).await {
        Ok(db) => {
            info!(path = %options.path.display(), "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %options.path.display(), error = %e, "Failed to open database");
            None
        }
    }
}

/// Health check both pools. Returns whether they answered in time.
pub async fn run_check(db: &Database, timeout: Duration) -> bool {
    match db.health_check(timeout).await {
        Ok(()) => {
            info!("Database is healthy");
            true
        }
        Err(e) => {
            error!(error = %e, "Database health check failed");
            false
        }
    }
}

/// Handle `revoke-user`: deactivate every session of `user_id`.
pub async fn handle_revoke_user(auth: &AuthCore, user_id: &str) -> bool {
    match auth.logout_everywhere(user_id).await {
        Ok(count) => {
            println!("Deactivated {} session(s) for {}", count, user_id);
            true
        }
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to revoke sessions");
            false
        }
    }
}
