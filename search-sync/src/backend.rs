//! The search backend contract.
//!
//! Covers the three provisioned resources (index, data source, indexer) and
//! the paged document search call. Implementations wrap the real search
//! service; [`InMemorySearchBackend`](crate::InMemorySearchBackend) stands in
//! for it in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use entity_store::ContinuationToken;

use crate::params::SearchParameters;
use crate::schema::IndexSchema;

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub documents: Vec<Map<String, Value>>,
    /// Present when more results remain within the call's result cap.
    pub continuation: Option<ContinuationToken>,
}

#[derive(Debug, Error)]
pub enum SearchBackendError {
    /// Another indexer run is already in progress.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The service rate-limited the request.
    #[error("Throttled: {0}")]
    Throttled(String),
    /// The named index/indexer/data source does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Any other service fault.
    #[error("Search service error: {0}")]
    Service(String),
}

impl SearchBackendError {
    /// Conflict and throttle are expected, benign races during on-demand
    /// reindexing; they get the retry-then-swallow treatment.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SearchBackendError::Conflict(_) | SearchBackendError::Throttled(_)
        )
    }
}

/// Backend contract for the external full-text search service.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn index_exists(&self, name: &str) -> Result<bool, SearchBackendError>;

    /// Create an index from a declared schema. Fails if it already exists.
    async fn create_index(&self, name: &str, schema: &IndexSchema)
        -> Result<(), SearchBackendError>;

    async fn delete_index(&self, name: &str) -> Result<(), SearchBackendError>;

    async fn data_source_exists(&self, name: &str) -> Result<bool, SearchBackendError>;

    /// Bind a data source to a store table, optionally attaching a
    /// soft-delete column policy.
    async fn create_data_source(
        &self,
        name: &str,
        table: &str,
        soft_delete_column: Option<&str>,
    ) -> Result<(), SearchBackendError>;

    async fn indexer_exists(&self, name: &str) -> Result<bool, SearchBackendError>;

    /// Create an indexer feeding `index_name` from `data_source_name` on a
    /// periodic schedule.
    async fn create_indexer(
        &self,
        name: &str,
        index_name: &str,
        data_source_name: &str,
        schedule: Duration,
    ) -> Result<(), SearchBackendError>;

    /// Ask for an immediate indexer run. [`SearchBackendError::Conflict`]
    /// when a run is already in flight.
    async fn run_indexer(&self, name: &str) -> Result<(), SearchBackendError>;

    /// Execute one page of a document search, resuming from `continuation`
    /// when given.
    async fn search(
        &self,
        index_name: &str,
        params: &SearchParameters,
        continuation: Option<&ContinuationToken>,
    ) -> Result<SearchPage, SearchBackendError>;
}
