pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod db;
pub mod jwt;

use auth::AuthCore;

/// Run cleanup tasks once and spawn the background scheduler.
pub async fn init_cleanup(auth: &AuthCore) -> tokio::task::JoinHandle<()> {
    cleanup::run_cleanup(auth).await;
    cleanup::spawn_cleanup_scheduler(auth.clone())
}
