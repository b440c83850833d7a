use thiserror::Error;

use crate::backend::SearchBackendError;

/// Errors surfaced by the synchronizer.
///
/// Reindex conflicts and throttles never appear here; the on-demand trigger
/// absorbs them after its bounded retry because index freshness is
/// best-effort by design.
#[derive(Debug, Error)]
pub enum SearchSyncError {
    /// A step of index/data-source/indexer provisioning failed. Surfaced to
    /// the caller that triggered initialization; the next call re-attempts
    /// provisioning from scratch.
    #[error("Index provisioning failed: {0}")]
    ProvisioningFailed(String),
    /// The search backend rejected a query.
    #[error("Search query failed: {0}")]
    Backend(#[from] SearchBackendError),
    /// An indexed document did not deserialize into the entity shape.
    #[error("Document decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}
