//! Composable filter predicates over named entity fields.
//!
//! A [`FilterExpression`] is an immutable predicate tree. [`FilterExpression::Empty`]
//! is the identity element under [`and`](FilterExpression::and) and
//! [`or`](FilterExpression::or), so callers can combine optional sub-filters
//! without special-casing "no constraint".
//!
//! The tree renders to an OData-style query string for real backends
//! ([`to_query_string`](FilterExpression::to_query_string)) and can be
//! evaluated in-process against stored rows ([`matches`](FilterExpression::matches)),
//! which is what the in-memory backends use. Field names and text literals are
//! inserted verbatim; escaping is the caller's responsibility.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::store::{TableRow, PARTITION_KEY, ROW_KEY};

/// A literal value on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(i64),
    Bool(bool),
    Timestamp(OffsetDateTime),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<OffsetDateTime> for FilterValue {
    fn from(value: OffsetDateTime) -> Self {
        FilterValue::Timestamp(value)
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(s) => write!(f, "'{}'", s),
            FilterValue::Number(n) => write!(f, "{}", n),
            FilterValue::Bool(b) => write!(f, "{}", b),
            FilterValue::Timestamp(ts) => {
                // Zulu literal; out-of-range timestamps render empty rather than panic
                write!(f, "{}", ts.format(&Rfc3339).unwrap_or_default())
            }
        }
    }
}

/// Comparison operator, rendered in OData notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Equal => "eq",
            CompareOp::NotEqual => "ne",
            CompareOp::GreaterThan => "gt",
            CompareOp::GreaterThanOrEqual => "ge",
            CompareOp::LessThan => "lt",
            CompareOp::LessThanOrEqual => "le",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::GreaterThan => ordering == Ordering::Greater,
            CompareOp::GreaterThanOrEqual => ordering != Ordering::Less,
            CompareOp::LessThan => ordering == Ordering::Less,
            CompareOp::LessThanOrEqual => ordering != Ordering::Greater,
        }
    }
}

/// An immutable boolean predicate over entity fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FilterExpression {
    /// No constraint; identity element under `and`/`or`.
    #[default]
    Empty,
    Compare {
        field: String,
        op: CompareOp,
        value: FilterValue,
    },
    /// Field equals any of the given values (OR of equalities).
    AnyOf {
        field: String,
        values: Vec<FilterValue>,
    },
    /// A whitespace-delimited set field contains any of the given whole tokens.
    TokenMatch {
        field: String,
        tokens: Vec<String>,
    },
    And(Box<FilterExpression>, Box<FilterExpression>),
    Or(Box<FilterExpression>, Box<FilterExpression>),
}

impl FilterExpression {
    pub fn equals(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        FilterExpression::Compare {
            field: field.into(),
            op: CompareOp::Equal,
            value: value.into(),
        }
    }

    pub fn compare(
        field: impl Into<String>,
        op: CompareOp,
        value: impl Into<FilterValue>,
    ) -> Self {
        FilterExpression::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// OR of equalities over `values`.
    ///
    /// An empty `values` yields [`FilterExpression::Empty`]: "no constraint",
    /// never "match nothing".
    pub fn field_in<V: Into<FilterValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values: Vec<FilterValue> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return FilterExpression::Empty;
        }
        FilterExpression::AnyOf {
            field: field.into(),
            values,
        }
    }

    /// Whole-token membership against a whitespace-delimited set field.
    ///
    /// Matches rows whose set field contains *any* of `tokens` as a whole
    /// token, not as a substring. Empty `tokens` yields `Empty`.
    pub fn exact_token_match<S: Into<String>>(
        field: impl Into<String>,
        tokens: impl IntoIterator<Item = S>,
    ) -> Self {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return FilterExpression::Empty;
        }
        FilterExpression::TokenMatch {
            field: field.into(),
            tokens,
        }
    }

    /// Inclusive lower bound on a timestamp field.
    pub fn date_at_least(field: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        FilterExpression::Compare {
            field: field.into(),
            op: CompareOp::GreaterThanOrEqual,
            value: FilterValue::Timestamp(timestamp),
        }
    }

    /// Conjunction. An `Empty` operand yields the other operand unchanged.
    pub fn and(self, other: FilterExpression) -> Self {
        match (self, other) {
            (FilterExpression::Empty, other) => other,
            (this, FilterExpression::Empty) => this,
            (this, other) => FilterExpression::And(Box::new(this), Box::new(other)),
        }
    }

    /// Disjunction. An `Empty` operand yields the other operand unchanged.
    pub fn or(self, other: FilterExpression) -> Self {
        match (self, other) {
            (FilterExpression::Empty, other) => other,
            (this, FilterExpression::Empty) => this,
            (this, other) => FilterExpression::Or(Box::new(this), Box::new(other)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FilterExpression::Empty)
    }

    /// Render the OData-style query string handed to real backends.
    ///
    /// `Empty` renders as an empty string. Combined non-empty operands are
    /// each parenthesized so precedence survives further composition.
    pub fn to_query_string(&self) -> String {
        match self {
            FilterExpression::Empty => String::new(),
            FilterExpression::Compare { field, op, value } => {
                format!("{} {} {}", field, op.symbol(), value)
            }
            FilterExpression::AnyOf { field, values } => {
                let clauses: Vec<String> = values
                    .iter()
                    .map(|v| format!("{} eq {}", field, v))
                    .collect();
                format!("({})", clauses.join(" or "))
            }
            FilterExpression::TokenMatch { field, tokens } => {
                format!("search.ismatch('{}', '{}')", tokens.join("|"), field)
            }
            FilterExpression::And(a, b) => {
                format!("({}) and ({})", a.to_query_string(), b.to_query_string())
            }
            FilterExpression::Or(a, b) => {
                format!("({}) or ({})", a.to_query_string(), b.to_query_string())
            }
        }
    }

    /// Evaluate against a stored row. `PartitionKey`/`RowKey` resolve to the
    /// row's key pair, any other field to its property map.
    pub fn matches(&self, row: &TableRow) -> bool {
        self.eval(|field| match field {
            PARTITION_KEY => Some(Value::String(row.partition_key.clone())),
            ROW_KEY => Some(Value::String(row.row_key.clone())),
            other => row.properties.get(other).cloned(),
        })
    }

    /// Evaluate against a bare property map (e.g. an indexed search document).
    pub fn matches_properties(&self, properties: &Map<String, Value>) -> bool {
        self.eval(|field| properties.get(field).cloned())
    }

    fn eval<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<Value> + Copy,
    {
        match self {
            FilterExpression::Empty => true,
            FilterExpression::Compare { field, op, value } => lookup(field)
                .and_then(|actual| compare_value(&actual, value))
                .map(|ordering| op.holds(ordering))
                .unwrap_or(false),
            FilterExpression::AnyOf { field, values } => match lookup(field) {
                Some(actual) => values
                    .iter()
                    .any(|v| compare_value(&actual, v) == Some(Ordering::Equal)),
                None => false,
            },
            FilterExpression::TokenMatch { field, tokens } => match lookup(field) {
                Some(Value::String(s)) => s
                    .split_whitespace()
                    .any(|token| tokens.iter().any(|t| t == token)),
                _ => false,
            },
            FilterExpression::And(a, b) => a.eval(lookup) && b.eval(lookup),
            FilterExpression::Or(a, b) => a.eval(lookup) || b.eval(lookup),
        }
    }
}

/// Compare a stored JSON value against a filter literal.
///
/// Returns `None` when the kinds are incompatible (treated as no match).
fn compare_value(actual: &Value, expected: &FilterValue) -> Option<Ordering> {
    match (actual, expected) {
        (Value::String(a), FilterValue::Text(e)) => Some(a.as_str().cmp(e.as_str())),
        (Value::Number(a), FilterValue::Number(e)) => a.as_i64().map(|a| a.cmp(e)),
        (Value::Bool(a), FilterValue::Bool(e)) => Some(a.cmp(e)),
        (Value::String(a), FilterValue::Timestamp(e)) => OffsetDateTime::parse(a, &Rfc3339)
            .ok()
            .map(|parsed| parsed.cmp(e)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn empty_is_identity_under_and() {
        let filter = FilterExpression::equals("status", "Approved");

        assert_eq!(filter.clone().and(FilterExpression::Empty), filter);
        assert_eq!(FilterExpression::Empty.and(filter.clone()), filter);
    }

    #[test]
    fn empty_is_identity_under_or() {
        let filter = FilterExpression::equals("status", "Approved");

        assert_eq!(filter.clone().or(FilterExpression::Empty), filter);
        assert_eq!(FilterExpression::Empty.or(filter.clone()), filter);
    }

    #[test]
    fn field_in_with_no_values_is_empty() {
        let filter = FilterExpression::field_in("RowKey", Vec::<String>::new());
        assert!(filter.is_empty());
        assert_eq!(filter.to_query_string(), "");
    }

    #[test]
    fn exact_token_match_with_no_tokens_is_empty() {
        assert!(FilterExpression::exact_token_match("keyword_ids", Vec::<String>::new()).is_empty());
    }

    #[test]
    fn renders_equality() {
        let filter = FilterExpression::equals("status", "Approved");
        assert_eq!(filter.to_query_string(), "status eq 'Approved'");
    }

    #[test]
    fn renders_field_in_as_or_of_equalities() {
        let filter = FilterExpression::field_in("RowKey", ["r1", "r2"]);
        assert_eq!(
            filter.to_query_string(),
            "(RowKey eq 'r1' or RowKey eq 'r2')"
        );
    }

    #[test]
    fn renders_date_at_least_as_zulu_literal() {
        let filter =
            FilterExpression::date_at_least("created_at", datetime!(2024-05-01 00:00:00 UTC));
        assert_eq!(filter.to_query_string(), "created_at ge 2024-05-01T00:00:00Z");
    }

    #[test]
    fn combined_operands_are_parenthesized() {
        let a = FilterExpression::equals("status", "Approved");
        let b = FilterExpression::equals("team_id", "t1");
        assert_eq!(
            a.and(b).to_query_string(),
            "(status eq 'Approved') and (team_id eq 't1')"
        );
    }

    fn row_with(field: &str, value: Value) -> TableRow {
        let mut row = TableRow::new("p", "r");
        row.properties.insert(field.to_string(), value);
        row
    }

    #[test]
    fn token_match_requires_whole_tokens() {
        let row = row_with("keyword_ids", Value::String("12 345 6".to_string()));

        assert!(FilterExpression::exact_token_match("keyword_ids", ["345"]).matches(&row));
        // "34" is a substring of "345" but not a whole token
        assert!(!FilterExpression::exact_token_match("keyword_ids", ["34"]).matches(&row));
    }

    #[test]
    fn matches_resolves_partition_and_row_key() {
        let row = TableRow::new("p1", "r1");

        assert!(FilterExpression::equals(PARTITION_KEY, "p1").matches(&row));
        assert!(FilterExpression::equals(ROW_KEY, "r1").matches(&row));
        assert!(!FilterExpression::equals(ROW_KEY, "r2").matches(&row));
    }

    #[test]
    fn date_at_least_is_inclusive() {
        let bound = datetime!(2024-05-01 00:00:00 UTC);
        let row = row_with("created_at", Value::String("2024-05-01T00:00:00Z".to_string()));

        assert!(FilterExpression::date_at_least("created_at", bound).matches(&row));
    }

    #[test]
    fn missing_field_never_matches() {
        let row = TableRow::new("p", "r");
        assert!(!FilterExpression::equals("status", "Approved").matches(&row));
    }
}
