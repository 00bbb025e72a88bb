pub mod enrichment;
pub mod focus;
pub mod hydrate;
pub mod pipeline;
pub mod presence;
pub mod receipts;
pub mod router;
pub mod sweeper;

use std::sync::Arc;

use pulse_db::Database;
use pulse_types::ChatError;

/// Run a blocking store operation off the async runtime, classifying
/// transient SQLite failures so callers can retry them.
pub async fn with_store<T, F>(db: &Arc<Database>, f: F) -> Result<T, ChatError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ChatError::Internal(format!("store task join error: {e}")))?
        .map_err(store_error)
}

pub(crate) fn store_error(err: anyhow::Error) -> ChatError {
    if pulse_db::is_busy(&err) {
        ChatError::TransientStore(err.to_string())
    } else {
        ChatError::Internal(format!("{err:#}"))
    }
}
