use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::AppState;

/// Start the background expiration cleaner task.
///
/// This loop never finishes on its own, so it is not a supervised unit; the
/// caller aborts the returned handle once shutdown has drained everything else.
pub fn start_expiration_cleaner(state: Arc<AppState>) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.tokens.cleanup_interval_seconds);

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            run_cleanup(&state).await;
        }
    })
}

async fn run_cleanup(state: &AppState) {
    debug!("Running expiration cleanup");

    match state.tokens.cleanup_expired().await {
        Ok(count) if count > 0 => debug!(tokens_cleaned = count, "Expired tokens cleaned"),
        Err(e) => error!(error = %e, "Failed to clean up expired tokens"),
        _ => {}
    }
}
