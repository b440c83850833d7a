//! Generic entity storage over a partition/row-key addressed table store.
//!
//! This crate is the storage half of the repository + search-sync core:
//!
//! - [`FilterExpression`] - composable boolean predicates over named fields
//! - [`EntityRepository`] - CRUD, batching and transparent pagination for one
//!   entity shape in one table
//! - [`TableStore`] - the backend contract (paged queries with continuation
//!   tokens, merge/replace upserts, atomic batches capped at 100 operations)
//! - [`InMemoryTableStore`] - an in-memory backend for tests and local runs
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemoryTableStore::new());
//! let repo: EntityRepository<NewsArticle> =
//!     EntityRepository::new(store, "NewsArticles", "Published");
//!
//! repo.create_or_update(&article).await?;
//! let filter = FilterExpression::equals("author_id", article.author_id.as_str());
//! let mine = repo.get_with_filter(&filter, None).await?;
//! ```

mod entity;
mod error;
mod filter;
mod memory;
mod repository;
mod store;

pub use entity::TableEntity;
pub use error::StoreError;
pub use filter::{CompareOp, FilterExpression, FilterValue};
pub use memory::InMemoryTableStore;
pub use repository::{CancelFlag, EntityRepository};
pub use store::{
    BatchOperation, ContinuationToken, RowPage, TableQuery, TableRow, TableStore, MAX_BATCH_SIZE,
    PARTITION_KEY, ROW_KEY,
};
