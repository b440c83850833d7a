//! Search index synchronization for entity tables.
//!
//! Keeps one external full-text index eventually consistent with one
//! [`entity_store`] table per entity type, and serves queries against it:
//!
//! - [`SearchSynchronizer`] - provisions the index, data source and indexer
//!   on first use (single-flight) and exposes token-free search
//! - [`IndexSchema`] / [`IndexedEntity`] - static per-entity schema
//!   declarations the index is built from
//! - [`SearchBackend`] - the search service contract;
//!   [`InMemorySearchBackend`] stands in for it in tests
//! - on-demand reindexing with bounded retry, tolerant of concurrent runs
//!
//! # Example
//!
//! ```ignore
//! let sync = SearchSynchronizer::<NewsArticle>::new(backend)
//!     .with_schedule(settings.search.indexer_interval());
//!
//! repo.create_or_update(&article).await?;
//! sync.run_indexer_on_demand().await?;
//!
//! let params = SearchParameters::new().with_query("budget");
//! let articles = sync.search(&params).await?;
//! ```
//!
//! A write that succeeds in the repository is durable even when the reindex
//! trigger fails; only search-result visibility lags until the next
//! scheduled run.

mod backend;
mod config;
mod error;
mod memory;
mod params;
mod reindex;
mod schema;
mod synchronizer;

pub use backend::{SearchBackend, SearchBackendError, SearchPage};
pub use crate::config::{read_config, SearchSettings, Settings, StorageSettings};
pub use error::SearchSyncError;
pub use memory::InMemorySearchBackend;
pub use params::SearchParameters;
pub use schema::{FieldKind, IndexField, IndexSchema, IndexedEntity, SearchIndexBinding};
pub use synchronizer::{SearchSynchronizer, DEFAULT_INDEXER_INTERVAL};
