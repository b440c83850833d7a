//! Generic CRUD, batch and paginated access to one table for one entity shape.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::entity::{from_row, to_row, TableEntity};
use crate::error::StoreError;
use crate::filter::FilterExpression;
use crate::store::{
    BatchOperation, ContinuationToken, TableQuery, TableStore, MAX_BATCH_SIZE, PARTITION_KEY,
    ROW_KEY,
};

/// Cooperative cancellation signal for paginated scans.
///
/// Checked between pages only; a network call already in flight is not
/// interrupted. Cancelled scans return whatever was accumulated so far.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Repository over one table for one entity shape.
///
/// Hides the backing store's pagination and batching limits. Every store
/// fault is logged here and re-raised unchanged; retry policy, if any,
/// belongs to the caller.
pub struct EntityRepository<T> {
    store: Arc<dyn TableStore>,
    table: String,
    default_partition: String,
    cancel: CancelFlag,
    _entity: PhantomData<fn() -> T>,
}

impl<T: TableEntity> EntityRepository<T> {
    pub fn new(
        store: Arc<dyn TableStore>,
        table: impl Into<String>,
        default_partition: impl Into<String>,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            default_partition: default_partition.into(),
            cancel: CancelFlag::new(),
            _entity: PhantomData,
        }
    }

    /// Attach a cancellation flag shared with the caller.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the backing table if it does not exist yet. Called at wiring
    /// time when the ensure-tables configuration flag is set.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        self.store.ensure_table(&self.table).await.map_err(|e| {
            error!(table = %self.table, error = %e, "Failed to ensure table exists");
            e
        })
    }

    /// Idempotent upsert with full-replace semantics: properties absent from
    /// `entity` are blanked on the stored row.
    pub async fn create_or_update(&self, entity: &T) -> Result<(), StoreError> {
        let row = to_row(entity)?;
        self.store
            .upsert_replace(&self.table, row)
            .await
            .map_err(|e| {
                error!(
                    table = %self.table,
                    partition_key = entity.partition_key(),
                    row_key = entity.row_key(),
                    error = %e,
                    "Replace upsert failed"
                );
                e
            })
    }

    /// Idempotent upsert with merge semantics: properties absent from
    /// `entity` keep their stored values.
    pub async fn insert_or_merge(&self, entity: &T) -> Result<(), StoreError> {
        let row = to_row(entity)?;
        self.store
            .upsert_merge(&self.table, row)
            .await
            .map_err(|e| {
                error!(
                    table = %self.table,
                    partition_key = entity.partition_key(),
                    row_key = entity.row_key(),
                    error = %e,
                    "Merge upsert failed"
                );
                e
            })
    }

    /// Point lookup. `None` when absent; absence never raises.
    pub async fn get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<T>, StoreError> {
        let row = self
            .store
            .retrieve(&self.table, partition_key, row_key)
            .await
            .map_err(|e| {
                error!(
                    table = %self.table,
                    partition_key,
                    row_key,
                    error = %e,
                    "Point lookup failed"
                );
                e
            })?;

        row.map(from_row).transpose()
    }

    /// Delete an entity, confirming it still exists first.
    ///
    /// The re-read protects against deleting from a stale in-memory copy;
    /// a row that is already gone fails with [`StoreError::NotFound`].
    pub async fn delete(&self, entity: &T) -> Result<(), StoreError> {
        let partition_key = entity.partition_key();
        let row_key = entity.row_key();

        let current = self
            .store
            .retrieve(&self.table, partition_key, row_key)
            .await
            .map_err(|e| {
                error!(table = %self.table, partition_key, row_key, error = %e, "Pre-delete read failed");
                e
            })?;

        if current.is_none() {
            warn!(table = %self.table, partition_key, row_key, "Delete of missing entity");
            return Err(StoreError::NotFound(format!(
                "{}/{} in table {}",
                partition_key, row_key, self.table
            )));
        }

        self.store
            .delete_row(&self.table, partition_key, row_key)
            .await
            .map_err(|e| {
                error!(table = %self.table, partition_key, row_key, error = %e, "Delete failed");
                e
            })
    }

    /// Full scan of one partition with an additional filter, following every
    /// continuation token.
    ///
    /// The filter is ANDed with a PartitionKey equality; `partition` defaults
    /// to the repository's default partition. An `Empty` filter means "no
    /// extra constraint".
    pub async fn get_with_filter(
        &self,
        filter: &FilterExpression,
        partition: Option<&str>,
    ) -> Result<Vec<T>, StoreError> {
        let combined = self.partition_filter(partition).and(filter.clone());
        let query = TableQuery::filtered(combined);

        let rows = self.scan(&query, None).await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Filterless listing of one partition, optionally truncated to `count`
    /// entities, following continuation tokens until satisfied or exhausted.
    pub async fn get_all(
        &self,
        partition: Option<&str>,
        count: Option<usize>,
    ) -> Result<Vec<T>, StoreError> {
        let query = TableQuery::filtered(self.partition_filter(partition));

        let rows = self.scan(&query, count).await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Single page with an explicit cursor; the only listing that exposes
    /// the continuation token to the caller.
    pub async fn get_paged(
        &self,
        partition: Option<&str>,
        count: Option<usize>,
        token: Option<ContinuationToken>,
    ) -> Result<(Vec<T>, Option<ContinuationToken>), StoreError> {
        let mut query = TableQuery::filtered(self.partition_filter(partition));
        query.take = count;

        let page = self
            .store
            .query(&self.table, &query, token.as_ref())
            .await
            .map_err(|e| {
                error!(table = %self.table, error = %e, "Paged query failed");
                e
            })?;

        let entities = page
            .rows
            .into_iter()
            .map(from_row)
            .collect::<Result<Vec<T>, _>>()?;
        Ok((entities, page.continuation))
    }

    /// Upsert entities in groups of at most [`MAX_BATCH_SIZE`], submitted
    /// sequentially in input order. A failed group fails the whole call; no
    /// partial-success bookkeeping across groups.
    ///
    /// Exactly one entity skips the batch envelope and goes through the
    /// single upsert path. That is an optimization, not a contract.
    pub async fn batch_upsert(&self, entities: &[T]) -> Result<(), StoreError> {
        if entities.is_empty() {
            return Ok(());
        }
        if entities.len() == 1 {
            return self.create_or_update(&entities[0]).await;
        }

        for group in entities.chunks(MAX_BATCH_SIZE) {
            let mut operations = Vec::with_capacity(group.len());
            for entity in group {
                operations.push(BatchOperation::Upsert(to_row(entity)?));
            }
            self.submit_group(operations).await?;
        }
        Ok(())
    }

    /// Delete entities in groups of at most [`MAX_BATCH_SIZE`], same
    /// grouping discipline as [`batch_upsert`](Self::batch_upsert) without
    /// the single-item special case.
    pub async fn batch_delete(&self, entities: &[T]) -> Result<(), StoreError> {
        for group in entities.chunks(MAX_BATCH_SIZE) {
            let operations = group
                .iter()
                .map(|entity| BatchOperation::Delete {
                    partition_key: entity.partition_key().to_string(),
                    row_key: entity.row_key().to_string(),
                })
                .collect();
            self.submit_group(operations).await?;
        }
        Ok(())
    }

    /// RowKey membership filter; empty input yields the empty filter, which
    /// callers must treat as "no constraint".
    pub fn row_key_filter(row_keys: &[String]) -> FilterExpression {
        FilterExpression::field_in(ROW_KEY, row_keys.iter().cloned())
    }

    /// Membership filter over an arbitrary column; empty input yields the
    /// empty filter.
    pub fn column_filter(values: &[String], column: &str) -> FilterExpression {
        FilterExpression::field_in(column, values.iter().cloned())
    }

    fn partition_filter(&self, partition: Option<&str>) -> FilterExpression {
        FilterExpression::equals(
            PARTITION_KEY,
            partition.unwrap_or(&self.default_partition),
        )
    }

    async fn submit_group(&self, operations: Vec<BatchOperation>) -> Result<(), StoreError> {
        let size = operations.len();
        self.store
            .submit_batch(&self.table, operations)
            .await
            .map_err(|e| {
                error!(table = %self.table, size, error = %e, "Batch submission failed");
                e
            })
    }

    /// Repeated paged fetches until no continuation token remains, `limit`
    /// is reached, or the cancel flag is raised between pages.
    async fn scan(
        &self,
        query: &TableQuery,
        limit: Option<usize>,
    ) -> Result<Vec<crate::store::TableRow>, StoreError> {
        let mut rows = Vec::new();
        let mut continuation: Option<ContinuationToken> = None;

        loop {
            if self.cancel.is_cancelled() {
                warn!(
                    table = %self.table,
                    collected = rows.len(),
                    "Scan cancelled, returning accumulated rows"
                );
                break;
            }

            let page = self
                .store
                .query(&self.table, query, continuation.as_ref())
                .await
                .map_err(|e| {
                    error!(table = %self.table, error = %e, "Segmented query failed");
                    e
                })?;

            rows.extend(page.rows);

            if let Some(limit) = limit {
                if rows.len() >= limit {
                    rows.truncate(limit);
                    break;
                }
            }

            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTableStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Keyword {
        partition_key: String,
        row_key: String,
        label: String,
        description: Option<String>,
    }

    impl TableEntity for Keyword {
        fn partition_key(&self) -> &str {
            &self.partition_key
        }

        fn row_key(&self) -> &str {
            &self.row_key
        }
    }

    fn keyword(row_key: &str, label: &str) -> Keyword {
        Keyword {
            partition_key: "Keywords".to_string(),
            row_key: row_key.to_string(),
            label: label.to_string(),
            description: Some(format!("About {}", label)),
        }
    }

    fn repo(store: Arc<InMemoryTableStore>) -> EntityRepository<Keyword> {
        EntityRepository::new(store, "KeywordEntity", "Keywords")
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store.clone());
        let kw = keyword("k1", "rust");

        repo.create_or_update(&kw).await.unwrap();
        repo.create_or_update(&kw).await.unwrap();

        let stored = repo.get("Keywords", "k1").await.unwrap().unwrap();
        assert_eq!(stored, kw);
        assert_eq!(repo.get_all(None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn merge_keeps_unset_fields_replace_blanks_them() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store.clone());

        repo.create_or_update(&keyword("k1", "rust")).await.unwrap();

        let partial = Keyword {
            partition_key: "Keywords".to_string(),
            row_key: "k1".to_string(),
            label: "rust-lang".to_string(),
            description: None,
        };

        repo.insert_or_merge(&partial).await.unwrap();
        let merged = repo.get("Keywords", "k1").await.unwrap().unwrap();
        assert_eq!(merged.label, "rust-lang");
        assert_eq!(merged.description.as_deref(), Some("About rust"));

        repo.create_or_update(&partial).await.unwrap();
        let replaced = repo.get("Keywords", "k1").await.unwrap().unwrap();
        assert_eq!(replaced.description, None);
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_entity() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store);

        assert!(repo.get("Keywords", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_of_missing_entity_is_not_found() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store);
        let kw = keyword("k1", "rust");

        repo.create_or_update(&kw).await.unwrap();
        repo.delete(&kw).await.unwrap();

        // second delete sees the row is gone
        let err = repo.delete(&kw).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn batch_upsert_groups_by_one_hundred() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store.clone());

        let entities: Vec<Keyword> = (0..250)
            .map(|i| keyword(&format!("k{:03}", i), "bulk"))
            .collect();

        repo.batch_upsert(&entities).await.unwrap();

        assert_eq!(store.batch_sizes(), vec![100, 100, 50]);
        assert_eq!(store.replace_count(), 0);
        assert_eq!(repo.get_all(None, None).await.unwrap().len(), 250);
    }

    #[tokio::test]
    async fn batch_upsert_of_one_entity_skips_the_batch_envelope() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store.clone());

        repo.batch_upsert(&[keyword("k1", "solo")]).await.unwrap();

        assert!(store.batch_sizes().is_empty());
        assert_eq!(store.replace_count(), 1);
    }

    #[tokio::test]
    async fn batch_delete_has_no_single_item_special_case() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store.clone());
        let kw = keyword("k1", "rust");

        repo.create_or_update(&kw).await.unwrap();
        repo.batch_delete(std::slice::from_ref(&kw)).await.unwrap();

        assert_eq!(store.batch_sizes(), vec![1]);
        assert!(repo.get("Keywords", "k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_all_follows_every_continuation_token() {
        let store = Arc::new(InMemoryTableStore::new().with_page_size(4));
        let repo = repo(store.clone());

        let entities: Vec<Keyword> = (0..10)
            .map(|i| keyword(&format!("k{:02}", i), "paged"))
            .collect();
        repo.batch_upsert(&entities).await.unwrap();

        let all = repo.get_all(None, None).await.unwrap();
        assert_eq!(all.len(), 10);
        // page order is preserved across the token-following loop
        let keys: Vec<&str> = all.iter().map(|k| k.row_key.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[tokio::test]
    async fn get_all_truncates_to_count() {
        let store = Arc::new(InMemoryTableStore::new().with_page_size(4));
        let repo = repo(store);

        let entities: Vec<Keyword> = (0..10)
            .map(|i| keyword(&format!("k{:02}", i), "paged"))
            .collect();
        repo.batch_upsert(&entities).await.unwrap();

        assert_eq!(repo.get_all(None, Some(6)).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn get_paged_walks_the_cursor_explicitly() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store);

        let entities: Vec<Keyword> = (0..25)
            .map(|i| keyword(&format!("k{:02}", i), "paged"))
            .collect();
        repo.batch_upsert(&entities).await.unwrap();

        let (first, token) = repo.get_paged(Some("Keywords"), Some(10), None).await.unwrap();
        assert_eq!(first.len(), 10);
        let token = token.expect("more pages expected");

        let (second, token) = repo
            .get_paged(Some("Keywords"), Some(10), Some(token))
            .await
            .unwrap();
        assert_eq!(second.len(), 10);
        let token = token.expect("one more page expected");

        let (third, token) = repo
            .get_paged(Some("Keywords"), Some(10), Some(token))
            .await
            .unwrap();
        assert_eq!(third.len(), 5);
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn get_with_filter_scopes_to_partition_and_filter() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store.clone());

        repo.create_or_update(&keyword("r1", "alpha")).await.unwrap();
        repo.create_or_update(&keyword("r2", "beta")).await.unwrap();
        repo.create_or_update(&keyword("r3", "gamma")).await.unwrap();

        let filter = EntityRepository::<Keyword>::row_key_filter(&[
            "r1".to_string(),
            "r2".to_string(),
        ]);
        let found = repo.get_with_filter(&filter, Some("Keywords")).await.unwrap();

        let mut keys: Vec<&str> = found.iter().map(|k| k.row_key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn empty_row_key_filter_means_no_constraint() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store);

        repo.create_or_update(&keyword("r1", "alpha")).await.unwrap();
        repo.create_or_update(&keyword("r2", "beta")).await.unwrap();

        let filter = EntityRepository::<Keyword>::row_key_filter(&[]);
        assert!(filter.is_empty());

        let found = repo.get_with_filter(&filter, None).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_scan_returns_accumulated_rows() {
        let store = Arc::new(InMemoryTableStore::new().with_page_size(4));
        let cancel = CancelFlag::new();
        let repo = repo(store).with_cancel_flag(cancel.clone());

        let entities: Vec<Keyword> = (0..10)
            .map(|i| keyword(&format!("k{:02}", i), "paged"))
            .collect();
        repo.batch_upsert(&entities).await.unwrap();

        cancel.cancel();
        let collected = repo.get_all(None, None).await.unwrap();
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn store_faults_are_reraised() {
        let store = Arc::new(InMemoryTableStore::new());
        let repo = repo(store.clone());

        store.fail_next(StoreError::Unavailable("503".to_string()));
        let err = repo.create_or_update(&keyword("k1", "rust")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
