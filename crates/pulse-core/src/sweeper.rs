use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use pulse_db::Database;
use pulse_types::ChatError;

use crate::with_store;

/// Background task that reaps expired messages.
///
/// Runs on an interval and hard-deletes every message whose `expires_at`
/// has passed, together with its receipt and hidden-for rows. Errors are
/// logged and retried on the next tick.
pub async fn run_sweep_loop(db: Arc<Database>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match sweep_expired(&db).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweeper: reaped {} expired messages", count);
                }
            }
            Err(e) => {
                warn!("Sweeper error: {}", e);
            }
        }
    }
}

pub async fn sweep_expired(db: &Arc<Database>) -> Result<usize, ChatError> {
    let now = Utc::now().to_rfc3339();
    with_store(db, move |db| db.delete_expired(&now)).await
}
