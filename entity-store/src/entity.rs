//! Entity <-> row mapping.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::store::TableRow;

/// An entity stored in one table, uniquely identified by
/// (PartitionKey, RowKey) within it.
///
/// The key pair is immutable after creation; the row key is typically a
/// caller-assigned GUID string. Serialization must produce a JSON object;
/// `Option::None` fields serialize to `null`, which replace-writes persist
/// (blanking the stored value) and merge-writes skip.
pub trait TableEntity: Serialize + DeserializeOwned + Send + Sync {
    fn partition_key(&self) -> &str;
    fn row_key(&self) -> &str;
}

pub(crate) fn to_row<T: TableEntity>(entity: &T) -> Result<TableRow, StoreError> {
    let value = serde_json::to_value(entity)?;
    let properties = match value {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::Serialization(format!(
                "entity must serialize to an object, got {}",
                json_kind(&other)
            )))
        }
    };

    Ok(TableRow {
        partition_key: entity.partition_key().to_string(),
        row_key: entity.row_key().to_string(),
        properties,
    })
}

pub(crate) fn from_row<T: TableEntity>(row: TableRow) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(row.properties))?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Article {
        partition_key: String,
        row_key: String,
        title: String,
        summary: Option<String>,
    }

    impl TableEntity for Article {
        fn partition_key(&self) -> &str {
            &self.partition_key
        }

        fn row_key(&self) -> &str {
            &self.row_key
        }
    }

    #[test]
    fn round_trips_through_row() {
        let article = Article {
            partition_key: "news".to_string(),
            row_key: "a1".to_string(),
            title: "Quarterly update".to_string(),
            summary: None,
        };

        let row = to_row(&article).unwrap();
        assert_eq!(row.partition_key, "news");
        assert_eq!(row.row_key, "a1");
        // None serializes to null so replace-writes blank the stored value
        assert_eq!(row.properties.get("summary"), Some(&Value::Null));

        let back: Article = from_row(row).unwrap();
        assert_eq!(back, article);
    }
}
