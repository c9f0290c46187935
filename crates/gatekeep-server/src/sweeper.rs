//! Periodic removal of expired sessions and SSO cache entries.

use std::sync::Arc;
use std::time::Duration;

use gatekeep_auth::{SessionStore, SsoValidator};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Spawns the sweeper. It runs every `interval` until `cancel` fires.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    sso: Arc<SsoValidator>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => sweep(&store, &sso).await,
            }
        }
        tracing::debug!("Session sweeper stopped");
    })
}

async fn sweep(store: &SessionStore, sso: &SsoValidator) {
    match store.cleanup_expired().await {
        Ok(0) => {}
        Ok(deleted) => tracing::info!(deleted, "Swept expired sessions"),
        Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
    }
    let purged = sso.cleanup_expired();
    if purged > 0 {
        tracing::debug!(purged, "Swept expired SSO cache entries");
    }
}
