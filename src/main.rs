use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use worklog::auth::AuthCore;
use worklog::cleanup::run_cleanup;
use worklog::cli::{
    Args, Command, build_auth_config, database_options, handle_revoke_user, init_logging,
    load_jwt_secret, open_database, run_check,
};
use worklog::db::Database;
use worklog::init_cleanup;

const STARTUP_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(db) = open_database(&database_options(&args)).await else {
        std::process::exit(1);
    };

    let ok = match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(&auth_core(&args, &db)).await,
        Command::Cleanup => {
            run_cleanup(&auth_core(&args, &db)).await;
            true
        }
        Command::Check { timeout } => run_check(&db, Duration::from_secs(timeout)).await,
        Command::RevokeUser { user_id } => {
            handle_revoke_user(&auth_core(&args, &db), &user_id).await
        }
    };

    db.close().await;
    if !ok {
        std::process::exit(1);
    }
}

/// Build the auth core, exiting if no usable secret is configured.
fn auth_core(args: &Args, db: &Database) -> AuthCore {
    let Some(secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };
    let Some(config) = build_auth_config(secret) else {
        std::process::exit(1);
    };
    AuthCore::new(db.clone(), config)
}

async fn serve(auth: &AuthCore) -> bool {
    if !run_check(auth.db(), STARTUP_CHECK_TIMEOUT).await {
        return false;
    }

    let scheduler = init_cleanup(auth).await;
    info!(
        interval_secs = auth.config().cleanup_interval.as_secs(),
        "Cleanup scheduler running"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down");
    scheduler.abort();
    true
}
