// ABOUTME: Source record capability and the row sources that implement it
// ABOUTME: Maps, SQLite rows, fetched query rows and JSON payloads expose values by column name

use std::collections::{BTreeMap, HashMap};

use base64::Engine;
use rusqlite::types::Value;
use serde_json::Value as JsonValue;

use crate::error::RecordError;

/// Read-only access to a row's values by column name.
///
/// This is the only thing a [`TableSync`](crate::TableSync) needs from
/// upstream data, so any row-like source (a query cursor, a decoded
/// message, a file record) can be replicated.
pub trait SourceRecord {
    fn value_of(&self, column: &str) -> Result<Value, RecordError>;
}

impl<R: SourceRecord + ?Sized> SourceRecord for &R {
    fn value_of(&self, column: &str) -> Result<Value, RecordError> {
        (**self).value_of(column)
    }
}

impl SourceRecord for HashMap<String, Value> {
    fn value_of(&self, column: &str) -> Result<Value, RecordError> {
        lookup(self.get(column), self.iter(), column)
    }
}

impl SourceRecord for BTreeMap<String, Value> {
    fn value_of(&self, column: &str) -> Result<Value, RecordError> {
        lookup(self.get(column), self.iter(), column)
    }
}

/// Exact match first, then the first entry equal ignoring case.
fn lookup<'a>(
    exact: Option<&Value>,
    mut entries: impl Iterator<Item = (&'a String, &'a Value)>,
    column: &str,
) -> Result<Value, RecordError> {
    if let Some(value) = exact {
        return Ok(value.clone());
    }
    entries
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .map(|(_, value)| value.clone())
        .ok_or_else(|| RecordError::MissingColumn(column.to_string()))
}

impl SourceRecord for rusqlite::Row<'_> {
    fn value_of(&self, column: &str) -> Result<Value, RecordError> {
        self.get::<_, Value>(column).map_err(|e| match e {
            rusqlite::Error::InvalidColumnName(_) => RecordError::MissingColumn(column.to_string()),
            source => RecordError::Read {
                column: column.to_string(),
                source,
            },
        })
    }
}

/// Rows fetched by a key lookup, read eagerly off the statement handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<FetchedRow<'_>> {
        self.iter().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = FetchedRow<'_>> {
        self.rows.iter().map(move |values| FetchedRow {
            columns: &self.columns,
            values,
        })
    }
}

/// One row of a [`RowSet`].
#[derive(Debug, Clone, Copy)]
pub struct FetchedRow<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> FetchedRow<'a> {
    /// Value of `column`, matched ignoring case.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let values = self.values;
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .map(|idx| &values[idx])
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    /// Copy the row into an owned map keyed by column name.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl SourceRecord for FetchedRow<'_> {
    fn value_of(&self, column: &str) -> Result<Value, RecordError> {
        self.get(column)
            .cloned()
            .ok_or_else(|| RecordError::MissingColumn(column.to_string()))
    }
}

/// A JSON object used as a source record, e.g. a decoded message payload.
///
/// Scalars map directly. `{"_type": "blob", "data": "<base64>"}` decodes to
/// a blob. Any other array or object is bound as its JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRecord {
    fields: serde_json::Map<String, JsonValue>,
}

impl JsonRecord {
    pub fn new(fields: serde_json::Map<String, JsonValue>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &serde_json::Map<String, JsonValue> {
        &self.fields
    }
}

impl TryFrom<JsonValue> for JsonRecord {
    type Error = RecordError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Object(fields) => Ok(Self::new(fields)),
            other => Err(RecordError::Unsupported {
                column: "<record>".to_string(),
                reason: format!("expected a JSON object, got {}", json_type_name(&other)),
            }),
        }
    }
}

impl SourceRecord for JsonRecord {
    fn value_of(&self, column: &str) -> Result<Value, RecordError> {
        let value = match self.fields.get(column) {
            Some(value) => value,
            None => self
                .fields
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, value)| value)
                .ok_or_else(|| RecordError::MissingColumn(column.to_string()))?,
        };
        json_to_value(column, value)
    }
}

/// Convert a JSON value to a SQLite value.
pub fn json_to_value(column: &str, value: &JsonValue) -> Result<Value, RecordError> {
    match value {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if n.is_f64() {
                n.as_f64().map(Value::Real).ok_or_else(|| RecordError::Unsupported {
                    column: column.to_string(),
                    reason: format!("number {} is not a finite float", n),
                })
            } else {
                // Integers past i64::MAX would lose precision as a REAL.
                Err(RecordError::Unsupported {
                    column: column.to_string(),
                    reason: format!("integer {} does not fit in i64", n),
                })
            }
        }
        JsonValue::String(s) => Ok(Value::Text(s.clone())),
        JsonValue::Object(obj) if obj.get("_type").and_then(JsonValue::as_str) == Some("blob") => {
            let data = obj
                .get("data")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| RecordError::Unsupported {
                    column: column.to_string(),
                    reason: "blob object is missing its base64 'data' field".to_string(),
                })?;
            base64::engine::general_purpose::STANDARD
                .decode(data)
                .map(Value::Blob)
                .map_err(|e| RecordError::Unsupported {
                    column: column.to_string(),
                    reason: format!("invalid base64 blob: {}", e),
                })
        }
        JsonValue::Array(_) | JsonValue::Object(_) => Ok(Value::Text(value.to_string())),
    }
}

/// Convert a SQLite value to JSON, the inverse of [`json_to_value`] for scalars.
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Integer(i) => JsonValue::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            // JSON has no NaN or Infinity
            .unwrap_or_else(|| JsonValue::String(f.to_string())),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Blob(b) => serde_json::json!({
            "_type": "blob",
            "data": base64::engine::general_purpose::STANDARD.encode(b),
        }),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_lookup_falls_back_to_case_insensitive() {
        let mut record = HashMap::new();
        record.insert("Name".to_string(), Value::Text("a".into()));
        record.insert("name".to_string(), Value::Text("exact".into()));
        record.insert("EMAIL".to_string(), Value::Text("a@x.com".into()));

        assert_eq!(record.value_of("name").unwrap(), Value::Text("exact".into()));
        assert_eq!(record.value_of("email").unwrap(), Value::Text("a@x.com".into()));
        assert!(matches!(
            record.value_of("id"),
            Err(RecordError::MissingColumn(c)) if c == "id"
        ));
    }

    #[test]
    fn json_record_converts_scalars() {
        let record = JsonRecord::try_from(json!({
            "id": 7,
            "score": 1.5,
            "active": true,
            "name": "ada",
            "note": null,
            "tags": ["a", "b"],
        }))
        .unwrap();

        assert_eq!(record.value_of("id").unwrap(), Value::Integer(7));
        assert_eq!(record.value_of("score").unwrap(), Value::Real(1.5));
        assert_eq!(record.value_of("active").unwrap(), Value::Integer(1));
        assert_eq!(record.value_of("NAME").unwrap(), Value::Text("ada".into()));
        assert_eq!(record.value_of("note").unwrap(), Value::Null);
        assert_eq!(
            record.value_of("tags").unwrap(),
            Value::Text(r#"["a","b"]"#.into())
        );
    }

    #[test]
    fn json_record_decodes_blobs() {
        let blob = value_to_json(&Value::Blob(vec![0, 159, 146, 150]));
        let record = JsonRecord::try_from(json!({ "payload": blob })).unwrap();
        assert_eq!(
            record.value_of("payload").unwrap(),
            Value::Blob(vec![0, 159, 146, 150])
        );

        let bad = JsonRecord::try_from(json!({ "payload": {"_type": "blob", "data": "!!"} })).unwrap();
        assert!(matches!(
            bad.value_of("payload"),
            Err(RecordError::Unsupported { .. })
        ));
    }

    #[test]
    fn json_integers_beyond_i64_are_rejected() {
        let record = JsonRecord::try_from(json!({
            "id": u64::MAX,
            "next": 9_223_372_036_854_775_808u64,
            "edge": i64::MAX,
            "low": i64::MIN,
        }))
        .unwrap();

        assert!(matches!(
            record.value_of("id"),
            Err(RecordError::Unsupported { column, .. }) if column == "id"
        ));
        assert!(matches!(
            record.value_of("next"),
            Err(RecordError::Unsupported { .. })
        ));
        assert_eq!(record.value_of("edge").unwrap(), Value::Integer(i64::MAX));
        assert_eq!(record.value_of("low").unwrap(), Value::Integer(i64::MIN));
    }

    #[test]
    fn json_record_requires_object() {
        assert!(JsonRecord::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn non_finite_reals_become_text() {
        assert_eq!(value_to_json(&Value::Real(f64::NAN)), json!("NaN"));
        assert_eq!(value_to_json(&Value::Integer(3)), json!(3));
    }

    #[test]
    fn fetched_rows_expose_values_by_name() {
        let set = RowSet::new(
            vec!["id".into(), "name".into()],
            vec![vec![Value::Integer(1), Value::Text("a".into())]],
        );
        assert_eq!(set.len(), 1);
        let row = set.first().unwrap();
        assert_eq!(row.get("NAME"), Some(&Value::Text("a".into())));
        assert_eq!(row.value_of("id").unwrap(), Value::Integer(1));
        assert!(row.value_of("email").is_err());
        assert_eq!(row.to_map().len(), 2);
    }

    #[test]
    fn sqlite_rows_are_records() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT 1 AS id, 'a' AS Name").unwrap();
        let mut rows = stmt.query([]).unwrap();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row.value_of("id").unwrap(), Value::Integer(1));
        assert_eq!(row.value_of("name").unwrap(), Value::Text("a".into()));
        assert!(matches!(
            row.value_of("missing"),
            Err(RecordError::MissingColumn(_))
        ));
    }
}
