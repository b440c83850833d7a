//! Static index schema descriptors.
//!
//! Each indexed entity declares its search schema as a `static` table of
//! [`IndexField`]s plus entity-specific defaults (page size, searchable
//! fields, ordering). The synchronizer provisions the index from this
//! declaration, so the schema is checked at compile time instead of being
//! assembled from runtime reflection.

use entity_store::TableEntity;

/// Data kind of an index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    Timestamp,
}

/// One field of an index schema.
#[derive(Debug, Clone, Copy)]
pub struct IndexField {
    pub name: &'static str,
    pub kind: FieldKind,
    /// The document key; exactly one field per schema.
    pub key: bool,
    pub searchable: bool,
    pub filterable: bool,
    pub sortable: bool,
}

impl IndexField {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            key: false,
            searchable: false,
            filterable: false,
            sortable: false,
        }
    }

    pub const fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub const fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub const fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub const fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }
}

/// Declared schema plus per-entity search defaults.
#[derive(Debug, Clone, Copy)]
pub struct IndexSchema {
    pub fields: &'static [IndexField],
    /// Result cap applied when a search call does not set `top`.
    pub default_page_size: usize,
    /// Fields searched when a call does not set `search_fields`.
    pub default_search_fields: &'static [&'static str],
    /// Ordering clauses (`"field asc"` / `"field desc"`) applied when a call
    /// does not set `order_by`.
    pub default_order_by: &'static [&'static str],
}

impl IndexSchema {
    pub fn key_field(&self) -> Option<&IndexField> {
        self.fields.iter().find(|f| f.key)
    }
}

/// Names binding one index, its indexer and its data source to a table.
///
/// Created once per entity type and reused; a process restart that runs
/// initialization again recreates the index from the declared schema.
#[derive(Debug, Clone)]
pub struct SearchIndexBinding {
    pub index_name: String,
    pub indexer_name: String,
    pub data_source_name: String,
    pub table_name: String,
    /// Boolean column marking rows logically deleted; the indexer prunes
    /// them from the index instead of serving them.
    pub soft_delete_column: Option<String>,
}

impl SearchIndexBinding {
    /// Derive the conventional index/indexer/data-source names for a table.
    pub fn for_table(table: impl Into<String>) -> Self {
        let table = table.into();
        let stem = table.to_lowercase();
        Self {
            index_name: format!("{}-index", stem),
            indexer_name: format!("{}-indexer", stem),
            data_source_name: format!("{}-storage", stem),
            table_name: table,
            soft_delete_column: None,
        }
    }

    pub fn with_soft_delete_column(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }
}

/// An entity that is mirrored into a full-text search index.
pub trait IndexedEntity: TableEntity {
    fn index_schema() -> &'static IndexSchema;

    /// Default binding for this entity type; overridable at synchronizer
    /// construction for multi-tenant setups.
    fn binding() -> SearchIndexBinding;
}

#[cfg(test)]
mod tests {
    use super::*;

    static SCHEMA: IndexSchema = IndexSchema {
        fields: &[
            IndexField::new("row_key", FieldKind::Text).key().filterable(),
            IndexField::new("title", FieldKind::Text).searchable(),
        ],
        default_page_size: 25,
        default_search_fields: &["title"],
        default_order_by: &["title asc"],
    };

    #[test]
    fn key_field_is_found() {
        assert_eq!(SCHEMA.key_field().map(|f| f.name), Some("row_key"));
    }

    #[test]
    fn binding_derives_conventional_names() {
        let binding = SearchIndexBinding::for_table("NewsArticle");
        assert_eq!(binding.index_name, "newsarticle-index");
        assert_eq!(binding.indexer_name, "newsarticle-indexer");
        assert_eq!(binding.data_source_name, "newsarticle-storage");
        assert_eq!(binding.table_name, "NewsArticle");
        assert!(binding.soft_delete_column.is_none());
    }
}
