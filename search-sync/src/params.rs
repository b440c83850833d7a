//! Per-call search configuration.

use entity_store::FilterExpression;

/// Parameters for one search call. Every field is optional; absent fields
/// fall back to the entity schema's defaults inside the synchronizer.
#[derive(Debug, Clone, Default)]
pub struct SearchParameters {
    /// Free-text query. `None` or empty matches everything.
    pub query: Option<String>,
    /// Result cap for the whole call (the engine may still page internally).
    pub top: Option<usize>,
    /// Results to skip before the first returned document.
    pub skip: Option<usize>,
    /// Fields to project; empty selects all.
    pub select: Vec<String>,
    /// Fields the free-text query runs against.
    pub search_fields: Vec<String>,
    /// Ordering clauses, `"field asc"` / `"field desc"`.
    pub order_by: Vec<String>,
    pub filter: FilterExpression,
}

impl SearchParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_select<S: Into<String>>(mut self, select: impl IntoIterator<Item = S>) -> Self {
        self.select = select.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_search_fields<S: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.search_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_order_by<S: Into<String>>(mut self, order_by: impl IntoIterator<Item = S>) -> Self {
        self.order_by = order_by.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: FilterExpression) -> Self {
        self.filter = filter;
        self
    }
}
