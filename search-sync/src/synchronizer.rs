//! Per-entity-type search index synchronization.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};
use uuid::Uuid;

use entity_store::ContinuationToken;

use crate::backend::{SearchBackend, SearchBackendError};
use crate::error::SearchSyncError;
use crate::params::SearchParameters;
use crate::reindex;
use crate::schema::{IndexSchema, IndexedEntity, SearchIndexBinding};

/// Default periodic indexer schedule.
pub const DEFAULT_INDEXER_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Keeps one search index eventually consistent with one entity table and
/// serves queries against it.
///
/// Provisioning (index, data source, indexer) runs once per instance,
/// triggered by the first caller into any operation. Concurrent callers
/// share the same in-flight initialization through a single-assignment
/// [`OnceCell`]; a failed initialization leaves the cell unset so the next
/// call re-provisions from scratch. Recreating the index mid-provision from
/// a second task would race, which is why there is exactly one future and
/// no ad hoc flag/lock pair.
pub struct SearchSynchronizer<T> {
    backend: Arc<dyn SearchBackend>,
    binding: SearchIndexBinding,
    schedule: Duration,
    init: OnceCell<()>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: IndexedEntity> SearchSynchronizer<T> {
    /// Synchronizer with the entity's default binding.
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self::with_binding(backend, T::binding())
    }

    pub fn with_binding(backend: Arc<dyn SearchBackend>, binding: SearchIndexBinding) -> Self {
        Self {
            backend,
            binding,
            schedule: DEFAULT_INDEXER_INTERVAL,
            init: OnceCell::new(),
            _entity: PhantomData,
        }
    }

    /// Override the periodic indexer schedule (from configuration).
    pub fn with_schedule(mut self, interval: Duration) -> Self {
        self.schedule = interval;
        self
    }

    pub fn binding(&self) -> &SearchIndexBinding {
        &self.binding
    }

    /// Free-text search over the entity's index.
    ///
    /// Waits for initialization, fills entity defaults for top, search
    /// fields and ordering, then follows every continuation token the
    /// engine returns; callers never see a token.
    pub async fn search(&self, params: &SearchParameters) -> Result<Vec<T>, SearchSyncError> {
        self.ensure_initialized().await?;

        let effective = self.apply_defaults(params.clone());
        let mut documents = Vec::new();
        let mut continuation: Option<ContinuationToken> = None;

        loop {
            let page = self
                .backend
                .search(&self.binding.index_name, &effective, continuation.as_ref())
                .await
                .map_err(|e| {
                    error!(index = %self.binding.index_name, error = %e, "Search request failed");
                    e
                })?;

            documents.extend(page.documents);

            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        documents
            .into_iter()
            .map(|doc| serde_json::from_value(Value::Object(doc)).map_err(SearchSyncError::from))
            .collect()
    }

    /// Ask for an immediate reindex after a write instead of waiting for the
    /// periodic schedule.
    ///
    /// Conflicts, throttles and other run failures are absorbed after a
    /// bounded retry (see [`crate::reindex`]); only an initialization
    /// failure propagates.
    pub async fn run_indexer_on_demand(&self) -> Result<(), SearchSyncError> {
        self.ensure_initialized().await?;

        reindex::run_indexer_with_retry(
            self.backend.as_ref(),
            &self.binding.indexer_name,
            reindex::RUN_RETRY_BASE_DELAY,
        )
        .await;

        Ok(())
    }

    async fn ensure_initialized(&self) -> Result<(), SearchSyncError> {
        self.init
            .get_or_try_init(|| self.provision())
            .await
            .map(|_| ())
    }

    async fn provision(&self) -> Result<(), SearchSyncError> {
        let correlation_id = Uuid::new_v4();
        info!(
            %correlation_id,
            index = %self.binding.index_name,
            table = %self.binding.table_name,
            "Provisioning search index"
        );

        if let Err(e) = self.provision_steps().await {
            error!(
                %correlation_id,
                index = %self.binding.index_name,
                error = %e,
                "Search index provisioning failed"
            );
            return Err(SearchSyncError::ProvisioningFailed(format!(
                "{} (correlation {})",
                e, correlation_id
            )));
        }

        info!(%correlation_id, index = %self.binding.index_name, "Search index ready");
        Ok(())
    }

    async fn provision_steps(&self) -> Result<(), SearchBackendError> {
        let schema = T::index_schema();

        // the index is always dropped and rebuilt from the declared schema,
        // so a restarted process never serves a stale field layout
        if self.backend.index_exists(&self.binding.index_name).await? {
            self.backend.delete_index(&self.binding.index_name).await?;
        }
        self.backend
            .create_index(&self.binding.index_name, schema)
            .await?;

        if !self
            .backend
            .data_source_exists(&self.binding.data_source_name)
            .await?
        {
            self.backend
                .create_data_source(
                    &self.binding.data_source_name,
                    &self.binding.table_name,
                    self.binding.soft_delete_column.as_deref(),
                )
                .await?;
        }

        if !self
            .backend
            .indexer_exists(&self.binding.indexer_name)
            .await?
        {
            self.backend
                .create_indexer(
                    &self.binding.indexer_name,
                    &self.binding.index_name,
                    &self.binding.data_source_name,
                    self.schedule,
                )
                .await?;
        }

        // fill the fresh index now instead of waiting for the schedule; a
        // concurrent run already covers that
        match self.backend.run_indexer(&self.binding.indexer_name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_busy() => {
                warn!(indexer = %self.binding.indexer_name, error = %e, "Initial indexer run already in flight");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn apply_defaults(&self, mut params: SearchParameters) -> SearchParameters {
        let schema: &IndexSchema = T::index_schema();

        if params.top.is_none() {
            params.top = Some(schema.default_page_size);
        }
        if params.search_fields.is_empty() {
            params.search_fields = schema
                .default_search_fields
                .iter()
                .map(|s| s.to_string())
                .collect();
        }
        if params.order_by.is_empty() {
            params.order_by = schema
                .default_order_by
                .iter()
                .map(|s| s.to_string())
                .collect();
        }
        params
    }
}
