//! On-demand reindex trigger.
//!
//! Asking the engine to run the indexer immediately is a freshness hint, not
//! a consistency boundary: the write is already durable in the store, only
//! search-result visibility lags. "Someone else is already reindexing" is
//! therefore treated as success after one retry, and any other failure is
//! logged and absorbed here so write paths never stall on index freshness.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::SearchBackend;

/// Total run attempts, including the first. Kept at the observed
/// retry-once behavior; this constant is where a configurable retry budget
/// would plug in.
pub(crate) const MAX_RUN_ATTEMPTS: u32 = 2;

/// Base delay of the linear backoff (base x attempt number).
pub(crate) const RUN_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

pub(crate) async fn run_indexer_with_retry(
    backend: &dyn SearchBackend,
    indexer: &str,
    base_delay: Duration,
) {
    let correlation_id = Uuid::new_v4();

    for attempt in 1..=MAX_RUN_ATTEMPTS {
        match backend.run_indexer(indexer).await {
            Ok(()) => {
                info!(%correlation_id, indexer, attempt, "On-demand indexer run accepted");
                return;
            }
            Err(e) if e.is_busy() => {
                if attempt < MAX_RUN_ATTEMPTS {
                    let delay = base_delay * attempt;
                    warn!(
                        %correlation_id,
                        indexer,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Indexer busy, backing off before retry"
                    );
                    sleep(delay).await;
                } else {
                    // the in-flight run picks up the same underlying change
                    info!(
                        %correlation_id,
                        indexer,
                        attempt,
                        "Indexer still busy after retry, deferring to the in-flight run"
                    );
                }
            }
            Err(e) => {
                error!(%correlation_id, indexer, attempt, error = %e, "On-demand indexer run failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SearchBackendError;
    use crate::memory::InMemorySearchBackend;

    const TEST_DELAY: Duration = Duration::from_millis(10);

    #[tokio::test(start_paused = true)]
    async fn accepted_run_stops_after_one_attempt() {
        let backend = InMemorySearchBackend::new();

        run_indexer_with_retry(&backend, "news-indexer", TEST_DELAY).await;

        assert_eq!(backend.run_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_is_retried_once_then_tolerated() {
        let backend = InMemorySearchBackend::new();
        backend.queue_run_error(SearchBackendError::Conflict("run in progress".to_string()));
        backend.queue_run_error(SearchBackendError::Conflict("run in progress".to_string()));

        // completes without surfacing anything despite both attempts failing
        run_indexer_with_retry(&backend, "news-indexer", TEST_DELAY).await;

        assert_eq!(backend.run_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_then_success_uses_the_retry() {
        let backend = InMemorySearchBackend::new();
        backend.queue_run_error(SearchBackendError::Throttled("429".to_string()));

        run_indexer_with_retry(&backend, "news-indexer", TEST_DELAY).await;

        assert_eq!(backend.run_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn service_error_is_swallowed_without_retry() {
        let backend = InMemorySearchBackend::new();
        backend.queue_run_error(SearchBackendError::Service("500".to_string()));

        run_indexer_with_retry(&backend, "news-indexer", TEST_DELAY).await;

        assert_eq!(backend.run_calls(), 1);
    }
}
