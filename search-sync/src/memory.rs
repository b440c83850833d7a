//! In-memory search backend for tests and local runs.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use entity_store::{ContinuationToken, TableQuery, TableStore, PARTITION_KEY, ROW_KEY};

use crate::backend::{SearchBackend, SearchBackendError, SearchPage};
use crate::params::SearchParameters;
use crate::schema::IndexSchema;

#[derive(Default)]
struct IndexState {
    key_field: Option<String>,
    documents: BTreeMap<String, Map<String, Value>>,
}

struct DataSourceState {
    table: String,
    soft_delete_column: Option<String>,
}

struct IndexerState {
    index_name: String,
    data_source_name: String,
}

#[derive(Default)]
struct State {
    indexes: HashMap<String, IndexState>,
    data_sources: HashMap<String, DataSourceState>,
    indexers: HashMap<String, IndexerState>,
    create_index_calls: usize,
    delete_index_calls: usize,
    run_calls: usize,
    run_errors: VecDeque<SearchBackendError>,
    fail_create_index: Option<SearchBackendError>,
    last_search: Option<SearchParameters>,
}

/// Search backend backed by in-memory maps.
///
/// Wired to a [`TableStore`], its `run_indexer` actually pulls rows from the
/// bound table into the index, pruning rows whose soft-delete column is set,
/// so the whole write -> reindex -> search pipeline runs in-process. Call
/// counters and injectable failures back the provisioning and retry tests.
pub struct InMemorySearchBackend {
    state: RwLock<State>,
    table_store: Option<Arc<dyn TableStore>>,
    page_size: RwLock<usize>,
}

impl Default for InMemorySearchBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySearchBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            table_store: None,
            page_size: RwLock::new(1000),
        }
    }

    /// Wire a table store so `run_indexer` pulls real rows.
    pub fn with_table_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.table_store = Some(store);
        self
    }

    /// Cap search pages at `page_size` documents so continuation tokens are
    /// exercised.
    pub fn set_search_page_size(&self, page_size: usize) {
        *self.page_size.write().unwrap() = page_size.max(1);
    }

    /// Queue an error for an upcoming `run_indexer` call (FIFO).
    pub fn queue_run_error(&self, error: SearchBackendError) {
        self.state.write().unwrap().run_errors.push_back(error);
    }

    /// Make the next `create_index` call fail with `error`.
    pub fn fail_next_create_index(&self, error: SearchBackendError) {
        self.state.write().unwrap().fail_create_index = Some(error);
    }

    pub fn create_index_calls(&self) -> usize {
        self.state.read().unwrap().create_index_calls
    }

    pub fn delete_index_calls(&self) -> usize {
        self.state.read().unwrap().delete_index_calls
    }

    pub fn run_calls(&self) -> usize {
        self.state.read().unwrap().run_calls
    }

    pub fn index_exists_named(&self, name: &str) -> bool {
        self.state.read().unwrap().indexes.contains_key(name)
    }

    pub fn data_source_exists_named(&self, name: &str) -> bool {
        self.state.read().unwrap().data_sources.contains_key(name)
    }

    pub fn indexer_exists_named(&self, name: &str) -> bool {
        self.state.read().unwrap().indexers.contains_key(name)
    }

    pub fn document_count(&self, index_name: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .indexes
            .get(index_name)
            .map(|index| index.documents.len())
            .unwrap_or(0)
    }

    /// Parameters of the most recent search call, defaults already applied.
    pub fn last_search_params(&self) -> Option<SearchParameters> {
        self.state.read().unwrap().last_search.clone()
    }
}

fn parse_token(token: &ContinuationToken) -> Result<usize, SearchBackendError> {
    token.as_str().parse::<usize>().map_err(|_| {
        SearchBackendError::Service(format!("malformed continuation token: {}", token.as_str()))
    })
}

fn matches_free_text(doc: &Map<String, Value>, query: &str, search_fields: &[String]) -> bool {
    let needle = query.to_lowercase();
    let haystacks: Vec<&str> = if search_fields.is_empty() {
        doc.values().filter_map(Value::as_str).collect()
    } else {
        search_fields
            .iter()
            .filter_map(|f| doc.get(f).and_then(Value::as_str))
            .collect()
    };
    haystacks
        .iter()
        .any(|text| text.to_lowercase().contains(&needle))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn sort_documents(documents: &mut [Map<String, Value>], order_by: &[String]) {
    // apply clauses in reverse so the first clause dominates (stable sort)
    for clause in order_by.iter().rev() {
        let mut parts = clause.split_whitespace();
        let Some(field) = parts.next() else { continue };
        let descending = parts.next().is_some_and(|d| d.eq_ignore_ascii_case("desc"));

        documents.sort_by(|a, b| {
            let ordering = compare_values(a.get(field), b.get(field));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    async fn index_exists(&self, name: &str) -> Result<bool, SearchBackendError> {
        Ok(self.index_exists_named(name))
    }

    async fn create_index(
        &self,
        name: &str,
        schema: &IndexSchema,
    ) -> Result<(), SearchBackendError> {
        let mut state = self.state.write().unwrap();
        state.create_index_calls += 1;
        if let Some(error) = state.fail_create_index.take() {
            return Err(error);
        }
        if state.indexes.contains_key(name) {
            return Err(SearchBackendError::Conflict(format!(
                "index {} already exists",
                name
            )));
        }
        state.indexes.insert(
            name.to_string(),
            IndexState {
                key_field: schema.key_field().map(|f| f.name.to_string()),
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), SearchBackendError> {
        let mut state = self.state.write().unwrap();
        state.delete_index_calls += 1;
        match state.indexes.remove(name) {
            Some(_) => Ok(()),
            None => Err(SearchBackendError::NotFound(format!("index {}", name))),
        }
    }

    async fn data_source_exists(&self, name: &str) -> Result<bool, SearchBackendError> {
        Ok(self.data_source_exists_named(name))
    }

    async fn create_data_source(
        &self,
        name: &str,
        table: &str,
        soft_delete_column: Option<&str>,
    ) -> Result<(), SearchBackendError> {
        self.state.write().unwrap().data_sources.insert(
            name.to_string(),
            DataSourceState {
                table: table.to_string(),
                soft_delete_column: soft_delete_column.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn indexer_exists(&self, name: &str) -> Result<bool, SearchBackendError> {
        Ok(self.indexer_exists_named(name))
    }

    async fn create_indexer(
        &self,
        name: &str,
        index_name: &str,
        data_source_name: &str,
        _schedule: Duration,
    ) -> Result<(), SearchBackendError> {
        self.state.write().unwrap().indexers.insert(
            name.to_string(),
            IndexerState {
                index_name: index_name.to_string(),
                data_source_name: data_source_name.to_string(),
            },
        );
        Ok(())
    }

    async fn run_indexer(&self, name: &str) -> Result<(), SearchBackendError> {
        {
            let mut state = self.state.write().unwrap();
            state.run_calls += 1;
            if let Some(error) = state.run_errors.pop_front() {
                return Err(error);
            }
        }

        let Some(store) = &self.table_store else {
            return Ok(());
        };

        let (index_name, table, soft_delete_column, key_field) = {
            let state = self.state.read().unwrap();
            let indexer = state
                .indexers
                .get(name)
                .ok_or_else(|| SearchBackendError::NotFound(format!("indexer {}", name)))?;
            let data_source = state
                .data_sources
                .get(&indexer.data_source_name)
                .ok_or_else(|| {
                    SearchBackendError::NotFound(format!(
                        "data source {}",
                        indexer.data_source_name
                    ))
                })?;
            let index = state.indexes.get(&indexer.index_name).ok_or_else(|| {
                SearchBackendError::NotFound(format!("index {}", indexer.index_name))
            })?;
            (
                indexer.index_name.clone(),
                data_source.table.clone(),
                data_source.soft_delete_column.clone(),
                index.key_field.clone(),
            )
        };

        // pull the whole table without holding the lock across awaits
        let mut rows = Vec::new();
        let query = TableQuery::default();
        let mut continuation = None;
        loop {
            let page = store
                .query(&table, &query, continuation.as_ref())
                .await
                .map_err(|e| SearchBackendError::Service(e.to_string()))?;
            rows.extend(page.rows);
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        let mut state = self.state.write().unwrap();
        let Some(index) = state.indexes.get_mut(&index_name) else {
            return Ok(());
        };
        for row in rows {
            let mut doc = row.properties;
            doc.insert(
                PARTITION_KEY.to_string(),
                Value::String(row.partition_key.clone()),
            );
            doc.insert(ROW_KEY.to_string(), Value::String(row.row_key.clone()));

            let doc_key = key_field
                .as_deref()
                .and_then(|k| doc.get(k))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}|{}", row.partition_key, row.row_key));

            let soft_deleted = soft_delete_column
                .as_deref()
                .and_then(|column| doc.get(column))
                .and_then(Value::as_bool)
                .unwrap_or(false);

            if soft_deleted {
                index.documents.remove(&doc_key);
            } else {
                index.documents.insert(doc_key, doc);
            }
        }

        Ok(())
    }

    async fn search(
        &self,
        index_name: &str,
        params: &SearchParameters,
        continuation: Option<&ContinuationToken>,
    ) -> Result<SearchPage, SearchBackendError> {
        let page_size = *self.page_size.read().unwrap();
        let mut state = self.state.write().unwrap();
        state.last_search = Some(params.clone());

        let index = state
            .indexes
            .get(index_name)
            .ok_or_else(|| SearchBackendError::NotFound(format!("index {}", index_name)))?;

        let mut matching: Vec<Map<String, Value>> = index
            .documents
            .values()
            .filter(|doc| params.filter.matches_properties(doc))
            .filter(|doc| match params.query.as_deref() {
                Some(query) if !query.trim().is_empty() => {
                    matches_free_text(doc, query.trim(), &params.search_fields)
                }
                _ => true,
            })
            .cloned()
            .collect();

        sort_documents(&mut matching, &params.order_by);

        let skip = params.skip.unwrap_or(0);
        let top = params.top.unwrap_or(usize::MAX);
        let mut capped: Vec<Map<String, Value>> =
            matching.into_iter().skip(skip).take(top).collect();

        if !params.select.is_empty() {
            for doc in &mut capped {
                doc.retain(|key, _| params.select.iter().any(|s| s == key));
            }
        }

        let start = match continuation {
            Some(token) => parse_token(token)?,
            None => 0,
        };
        let end = capped.len().min(start.saturating_add(page_size));
        let documents = capped.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let continuation = if end < capped.len() {
            Some(ContinuationToken::new(end.to_string()))
        } else {
            None
        };

        Ok(SearchPage {
            documents,
            continuation,
        })
    }
}
