//! Scheduled cleanup of expired denylist entries and sessions.

use tracing::{error, info};

use crate::auth::AuthCore;

/// Run all cleanup tasks once. Failures are logged, never raised.
pub async fn run_cleanup(auth: &AuthCore) {
    match auth.cleanup_expired_tokens().await {
        Ok(count) if count > 0 => info!(count, "Cleaned up expired denylist entries"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to clean up expired denylist entries"),
    }

    match auth.expire_sessions().await {
        Ok(count) if count > 0 => info!(count, "Deactivated expired sessions"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to deactivate expired sessions"),
    }
}

/// Spawn a background task that runs cleanup every `cleanup_interval`.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(auth: AuthCore) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(auth.config().cleanup_interval);
        // The first tick completes immediately; callers run a pass on startup.
        interval.tick().await;

        loop {
            interval.tick().await;
            run_cleanup(&auth).await;
        }
    })
}
