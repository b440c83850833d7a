//! In-memory table store for tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::store::{
    BatchOperation, ContinuationToken, RowPage, TableQuery, TableRow, TableStore, MAX_BATCH_SIZE,
};

type RowKey = (String, String);
type Table = BTreeMap<RowKey, Map<String, Value>>;

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    batch_sizes: Vec<usize>,
    replace_count: usize,
    merge_count: usize,
    fail_next: Option<StoreError>,
}

/// Table store backed by an in-memory map.
///
/// Rows iterate in (PartitionKey, RowKey) order, which is the page order
/// scans observe. A configurable page size forces real continuation tokens
/// through the pagination paths, and call counters let tests assert on the
/// batching discipline.
///
/// # Examples
///
/// ```ignore
/// let store = Arc::new(InMemoryTableStore::new().with_page_size(10));
/// let repo: EntityRepository<Keyword> = EntityRepository::new(store, "Keywords", "Default");
/// ```
pub struct InMemoryTableStore {
    state: RwLock<State>,
    page_size: usize,
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            page_size: 1000,
        }
    }

    /// Cap pages at `page_size` rows so multi-page scans are exercised.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make the next store call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        self.state.write().unwrap().fail_next = Some(error);
    }

    /// Sizes of every submitted batch, in submission order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.read().unwrap().batch_sizes.clone()
    }

    /// Number of single (non-batched) replace upserts.
    pub fn replace_count(&self) -> usize {
        self.state.read().unwrap().replace_count
    }

    /// Number of single (non-batched) merge upserts.
    pub fn merge_count(&self) -> usize {
        self.state.read().unwrap().merge_count
    }

    /// Total rows across all tables.
    pub fn row_count(&self) -> usize {
        let state = self.state.read().unwrap();
        state.tables.values().map(Table::len).sum()
    }

    fn take_fault(state: &mut State) -> Result<(), StoreError> {
        match state.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn merge_into(existing: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        // nulls mean "unset" for merge writes
        if !value.is_null() {
            existing.insert(key, value);
        }
    }
}

fn parse_token(token: &ContinuationToken) -> Result<usize, StoreError> {
    token
        .as_str()
        .parse::<usize>()
        .map_err(|_| StoreError::Unavailable(format!("malformed continuation token: {}", token.as_str())))
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        Self::take_fault(&mut state)?;
        state.tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn upsert_replace(&self, table: &str, row: TableRow) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        Self::take_fault(&mut state)?;
        state.replace_count += 1;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert((row.partition_key, row.row_key), row.properties);
        Ok(())
    }

    async fn upsert_merge(&self, table: &str, row: TableRow) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        Self::take_fault(&mut state)?;
        state.merge_count += 1;
        let entry = state
            .tables
            .entry(table.to_string())
            .or_default()
            .entry((row.partition_key, row.row_key))
            .or_default();
        merge_into(entry, row.properties);
        Ok(())
    }

    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableRow>, StoreError> {
        let mut state = self.state.write().unwrap();
        Self::take_fault(&mut state)?;
        let key = (partition_key.to_string(), row_key.to_string());
        let row = state.tables.get(table).and_then(|t| t.get(&key)).map(|props| TableRow {
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
            properties: props.clone(),
        });
        Ok(row)
    }

    async fn delete_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        Self::take_fault(&mut state)?;
        let key = (partition_key.to_string(), row_key.to_string());
        let removed = state.tables.get_mut(table).and_then(|t| t.remove(&key));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!(
                "{}/{} in table {}",
                partition_key, row_key, table
            ))),
        }
    }

    async fn query(
        &self,
        table: &str,
        query: &TableQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<RowPage, StoreError> {
        let mut state = self.state.write().unwrap();
        Self::take_fault(&mut state)?;

        let matching: Vec<TableRow> = state
            .tables
            .get(table)
            .map(|t| {
                t.iter()
                    .map(|((partition_key, row_key), properties)| TableRow {
                        partition_key: partition_key.clone(),
                        row_key: row_key.clone(),
                        properties: properties.clone(),
                    })
                    .filter(|row| query.filter.matches(row))
                    .collect()
            })
            .unwrap_or_default();

        let start = match continuation {
            Some(token) => parse_token(token)?,
            None => 0,
        };
        let page_limit = query.take.unwrap_or(usize::MAX).min(self.page_size);
        let end = matching.len().min(start.saturating_add(page_limit));

        let rows: Vec<TableRow> = matching
            .get(start..end)
            .map(<[TableRow]>::to_vec)
            .unwrap_or_default();
        let continuation = if end < matching.len() {
            Some(ContinuationToken::new(end.to_string()))
        } else {
            None
        };

        Ok(RowPage { rows, continuation })
    }

    async fn submit_batch(
        &self,
        table: &str,
        operations: Vec<BatchOperation>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        Self::take_fault(&mut state)?;

        if operations.len() > MAX_BATCH_SIZE {
            return Err(StoreError::Unavailable(format!(
                "batch of {} exceeds the {}-operation limit",
                operations.len(),
                MAX_BATCH_SIZE
            )));
        }

        state.batch_sizes.push(operations.len());
        let rows = state.tables.entry(table.to_string()).or_default();

        // validate before applying so the batch is all-or-nothing
        for operation in &operations {
            if let BatchOperation::Delete {
                partition_key,
                row_key,
            } = operation
            {
                let key = (partition_key.clone(), row_key.clone());
                if !rows.contains_key(&key) {
                    return Err(StoreError::NotFound(format!(
                        "{}/{} in table {}",
                        partition_key, row_key, table
                    )));
                }
            }
        }

        for operation in operations {
            match operation {
                BatchOperation::Upsert(row) => {
                    rows.insert((row.partition_key, row.row_key), row.properties);
                }
                BatchOperation::Delete {
                    partition_key,
                    row_key,
                } => {
                    rows.remove(&(partition_key, row_key));
                }
            }
        }

        Ok(())
    }
}
