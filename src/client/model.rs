//! Result rows, schemas and metadata records returned by the client

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cell of a result row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    /// Scalars travel as strings on the BigQuery wire, whatever their column type
    Primitive(String),
    Repeated(Vec<FieldValue>),
    Record(Vec<FieldValue>),
}

impl FieldValue {
    pub fn primitive(value: impl Into<String>) -> Self {
        FieldValue::Primitive(value.into())
    }

    /// Decode a `{"v": ...}` payload
    pub(crate) fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::String(s) => FieldValue::Primitive(s.clone()),
            Value::Array(items) => FieldValue::Repeated(
                items
                    .iter()
                    .map(|item| FieldValue::from_json(item.get("v").unwrap_or(item)))
                    .collect(),
            ),
            Value::Object(obj) => match obj.get("f") {
                Some(Value::Array(cells)) => FieldValue::Record(decode_cells(cells)),
                _ => FieldValue::Primitive(value.to_string()),
            },
            other => FieldValue::Primitive(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "NULL"),
            FieldValue::Primitive(s) => write!(f, "{s}"),
            FieldValue::Repeated(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            FieldValue::Record(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn decode_cells(cells: &[Value]) -> Vec<FieldValue> {
    cells
        .iter()
        .map(|cell| FieldValue::from_json(cell.get("v").unwrap_or(&Value::Null)))
        .collect()
}

/// An ordered list of field values
///
/// The field count is whatever the backend sent; rows are not validated
/// against the schema.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row(pub Vec<FieldValue>);

impl Row {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Row(values)
    }

    /// Decode a `{"f": [{"v": ...}, ...]}` row
    pub(crate) fn from_json(value: &Value) -> Self {
        match value.get("f") {
            Some(Value::Array(cells)) => Row(decode_cells(cells)),
            _ => Row::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.0
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for value in &self.0 {
            write!(f, "{value},")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: None,
            fields: Vec::new(),
        }
    }
}

/// Partial dataset record; listing only returns identity fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub project_id: String,
    pub dataset_id: String,
    pub friendly_name: Option<String>,
}

/// Partial table record; listing only returns identity fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }
}

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

/// One `getQueryResults` answer
///
/// `job_complete == false` means the long-poll window elapsed before the job
/// finished; rows and page token are only meaningful once complete.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultsPage {
    pub job_complete: bool,
    pub schema: Option<TableSchema>,
    pub rows: Vec<Row>,
    pub page_token: Option<String>,
    pub total_rows: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_from_json_primitives_and_nulls() {
        let row = Row::from_json(&json!({"f": [{"v": "1"}, {"v": null}, {"v": "abc"}]}));
        assert_eq!(
            row,
            Row(vec![
                FieldValue::primitive("1"),
                FieldValue::Null,
                FieldValue::primitive("abc"),
            ])
        );
        assert_eq!(row.to_string(), "1,NULL,abc,");
    }

    #[test]
    fn test_row_from_json_nested() {
        let row = Row::from_json(&json!({"f": [
            {"v": [{"v": "a"}, {"v": "b"}]},
            {"v": {"f": [{"v": "x"}, {"v": "2"}]}}
        ]}));
        assert_eq!(row.len(), 2);
        assert_eq!(row.values()[0].to_string(), "[a,b]");
        assert_eq!(row.values()[1].to_string(), "{x,2}");
    }

    #[test]
    fn test_row_without_cells_is_empty() {
        assert!(Row::from_json(&json!({})).is_empty());
    }

    #[test]
    fn test_schema_deserializes_type_field() {
        let schema: TableSchema = serde_json::from_value(json!({
            "fields": [
                {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
                {"name": "tags", "type": "RECORD", "fields": [{"name": "k", "type": "STRING"}]}
            ]
        }))
        .unwrap();
        assert_eq!(schema.fields[0].field_type, "INTEGER");
        assert_eq!(schema.fields[0].mode.as_deref(), Some("REQUIRED"));
        assert_eq!(schema.fields[1].fields[0].name, "k");
    }
}
