//! The table store backend contract.
//!
//! Backends expose partition/row-key addressed rows, segmented queries that
//! return a page plus an opaque continuation token, merge/replace upserts and
//! atomic batches capped at [`MAX_BATCH_SIZE`] operations.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::filter::FilterExpression;

/// Field name under which the partition key is addressed in filters.
pub const PARTITION_KEY: &str = "PartitionKey";
/// Field name under which the row key is addressed in filters.
pub const ROW_KEY: &str = "RowKey";

/// The store's atomic-batch ceiling.
pub const MAX_BATCH_SIZE: usize = 100;

/// A stored row: key pair plus a property map.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    pub properties: Map<String, Value>,
}

impl TableRow {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: Map::new(),
        }
    }
}

/// Opaque cursor returned by a paged query.
///
/// Produced by one call and consumed by exactly the next call of the same
/// scan; never persisted across process restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a segmented query.
#[derive(Debug, Clone, Default)]
pub struct RowPage {
    pub rows: Vec<TableRow>,
    /// Present when more results remain.
    pub continuation: Option<ContinuationToken>,
}

/// A filtered, optionally truncated query against one table.
#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    pub filter: FilterExpression,
    /// Upper bound on rows returned per page, when the caller wants fewer
    /// than the backend's page size.
    pub take: Option<usize>,
}

impl TableQuery {
    pub fn filtered(filter: FilterExpression) -> Self {
        Self { filter, take: None }
    }

    pub fn with_take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }
}

/// One operation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Upsert(TableRow),
    Delete {
        partition_key: String,
        row_key: String,
    },
}

/// Backend contract for a partition/row-key addressed table store.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create the table if it does not exist yet.
    async fn ensure_table(&self, table: &str) -> Result<(), StoreError>;

    /// Upsert with full-replace semantics: the stored property map is swapped
    /// for the given one.
    async fn upsert_replace(&self, table: &str, row: TableRow) -> Result<(), StoreError>;

    /// Upsert with merge semantics: null or absent properties leave stored
    /// values intact.
    async fn upsert_merge(&self, table: &str, row: TableRow) -> Result<(), StoreError>;

    /// Point lookup. `None` when the row is absent; absence is not an error.
    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableRow>, StoreError>;

    /// Delete one row. Fails with [`StoreError::NotFound`] when absent.
    async fn delete_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<(), StoreError>;

    /// Execute one segment of a query, resuming from `continuation` when given.
    async fn query(
        &self,
        table: &str,
        query: &TableQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<RowPage, StoreError>;

    /// Submit up to [`MAX_BATCH_SIZE`] operations; all succeed or none do.
    async fn submit_batch(
        &self,
        table: &str,
        operations: Vec<BatchOperation>,
    ) -> Result<(), StoreError>;
}
