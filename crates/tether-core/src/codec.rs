//! Conversion between domain rows and their `SQLite` representation

use std::fmt;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use serde_json::{Number, Value};

use crate::error::{Error, Result};
use crate::models::{LocalRow, Row, SyncMeta};
use crate::schema::{Column, ColumnType, TableSchema};

/// Post-load transformation applied once to every row handed to callers
pub type Hydrator = Arc<dyn Fn(&mut Row) + Send + Sync>;

/// Encodes rows for storage and decodes stored rows for one table
#[derive(Clone)]
pub struct RowCodec {
    schema: Arc<TableSchema>,
    hydrator: Option<Hydrator>,
}

impl fmt::Debug for RowCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCodec")
            .field("table", &self.schema.name())
            .field("hydrator", &self.hydrator.is_some())
            .finish()
    }
}

impl RowCodec {
    pub const fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            hydrator: None,
        }
    }

    #[must_use]
    pub fn with_hydrator(mut self, hydrator: Hydrator) -> Self {
        self.hydrator = Some(hydrator);
        self
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Bind values for every column (application columns, then sync columns)
    /// in the order used by the generated statements
    pub fn encode(&self, row: &Row, meta: &SyncMeta) -> Result<Vec<SqlValue>> {
        let mut values = Vec::with_capacity(self.schema.columns().len() + 3);
        for column in self.schema.columns() {
            values.push(encode_value(
                &column.name,
                column.column_type,
                row.get(&column.name),
            )?);
        }
        values.push(SqlValue::Integer(i64::from(meta.modified)));
        values.push(SqlValue::Integer(meta.modified_date));
        values.push(SqlValue::Integer(i64::from(meta.deleted)));
        Ok(values)
    }

    /// Decode a stored row without running the hydration hook
    pub fn decode_raw(&self, stored: &rusqlite::Row<'_>) -> Result<LocalRow> {
        let columns = self.schema.columns();
        let mut row = Row::new();
        for (index, column) in columns.iter().enumerate() {
            let raw: SqlValue = stored.get(index)?;
            if let Some(value) = decode_value(column, raw)? {
                row.set(column.name.clone(), value);
            }
        }

        let offset = columns.len();
        let meta = SyncMeta {
            modified: stored.get::<_, i64>(offset)? != 0,
            modified_date: stored.get(offset + 1)?,
            deleted: stored.get::<_, i64>(offset + 2)? != 0,
        };
        Ok(LocalRow::new(row, meta))
    }

    /// Decode a stored row for a caller-facing read path
    pub fn decode(&self, stored: &rusqlite::Row<'_>) -> Result<LocalRow> {
        self.decode_raw(stored).map(|row| self.hydrate(row))
    }

    /// Run the hydration hook, if any
    pub fn hydrate(&self, mut local: LocalRow) -> LocalRow {
        if let Some(hydrator) = &self.hydrator {
            hydrator(&mut local.row);
        }
        local
    }
}

/// Convert one domain value to its storage form.
///
/// A missing value (`undefined`) and an explicit `null` are both stored as NULL.
pub fn encode_value(column: &str, column_type: ColumnType, value: Option<&Value>) -> Result<SqlValue> {
    let Some(value) = value else {
        return Ok(SqlValue::Null);
    };
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match column_type {
        ColumnType::Number => match value {
            Value::Number(number) => number
                .as_i64()
                .map(SqlValue::Integer)
                .or_else(|| number.as_f64().map(SqlValue::Real))
                .ok_or_else(|| Error::codec(column, "number is out of range")),
            Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
            other => Err(mismatch(column, column_type, other)),
        },
        ColumnType::Integer => match value {
            Value::Number(number) => number
                .as_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| Error::codec(column, format!("{number} is not an integer"))),
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|_| mismatch(column, column_type, value)),
            Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
            other => Err(mismatch(column, column_type, other)),
        },
        ColumnType::Text => match value {
            Value::String(text) => Ok(SqlValue::Text(text.clone())),
            Value::Number(_) | Value::Bool(_) => Ok(SqlValue::Text(value.to_string())),
            other => Err(mismatch(column, column_type, other)),
        },
        ColumnType::Bit | ColumnType::Boolean => match value {
            Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
            Value::Number(number) => match number.as_i64() {
                Some(bit @ (0 | 1)) => Ok(SqlValue::Integer(bit)),
                _ => Err(mismatch(column, column_type, value)),
            },
            other => Err(mismatch(column, column_type, other)),
        },
        ColumnType::Date => match value {
            Value::String(text) => Ok(SqlValue::Text(text.clone())),
            Value::Number(number) => number
                .as_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| mismatch(column, column_type, value)),
            other => Err(mismatch(column, column_type, other)),
        },
        ColumnType::Json => Ok(SqlValue::Text(serde_json::to_string(value)?)),
    }
}

/// Convert one stored value back to its domain form.
///
/// Returns `None` when the value should be left undefined (NULL in a
/// non-nullable column).
pub fn decode_value(column: &Column, raw: SqlValue) -> Result<Option<Value>> {
    let name = column.name.as_str();
    let value = match (column.column_type, raw) {
        (_, SqlValue::Null) => return Ok(column.nullable.then_some(Value::Null)),
        (_, SqlValue::Blob(_)) => {
            return Err(Error::codec(name, "unexpected blob in storage"));
        }
        (ColumnType::Number | ColumnType::Integer | ColumnType::Date, SqlValue::Integer(int)) => {
            Value::from(int)
        }
        (ColumnType::Number, SqlValue::Real(real)) => Number::from_f64(real)
            .map(Value::Number)
            .ok_or_else(|| Error::codec(name, "stored number is not finite"))?,
        (ColumnType::Number | ColumnType::Integer, SqlValue::Text(text)) => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| Error::codec(name, format!("stored text `{text}` is not numeric")))?,
        (ColumnType::Integer, SqlValue::Real(real)) => {
            return Err(Error::codec(name, format!("stored value {real} is not an integer")));
        }
        (ColumnType::Text | ColumnType::Date, SqlValue::Text(text)) => Value::String(text),
        (ColumnType::Text, SqlValue::Integer(int)) => Value::String(int.to_string()),
        (ColumnType::Text | ColumnType::Date, SqlValue::Real(real)) => {
            Value::String(real.to_string())
        }
        (ColumnType::Bit, SqlValue::Integer(bit)) => Value::from(i64::from(bit != 0)),
        (ColumnType::Boolean, SqlValue::Integer(flag)) => Value::Bool(flag != 0),
        (ColumnType::Json, SqlValue::Text(text)) => serde_json::from_str(&text)
            .map_err(|error| Error::codec(name, format!("stored JSON is invalid: {error}")))?,
        (column_type, raw) => {
            return Err(Error::codec(
                name,
                format!("cannot read {raw:?} as {column_type}"),
            ));
        }
    };
    Ok(Some(value))
}

fn mismatch(column: &str, column_type: ColumnType, value: &Value) -> Error {
    Error::codec(column, format!("expected {column_type}, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> Arc<TableSchema> {
        Arc::new(
            TableSchema::builder("items", "id")
                .column("id", ColumnType::Integer)
                .nullable_column("title", ColumnType::Text)
                .column("done", ColumnType::Boolean)
                .column("flag", ColumnType::Bit)
                .nullable_column("meta", ColumnType::Json)
                .nullable_column("due", ColumnType::Date)
                .nullable_column("score", ColumnType::Number)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_encode_missing_values_as_null() {
        let codec = RowCodec::new(schema());
        let values = codec
            .encode(&Row::new().with("id", 1), &SyncMeta::pending(99))
            .unwrap();
        assert_eq!(values.len(), 10);
        assert_eq!(values[0], SqlValue::Integer(1));
        assert_eq!(values[1], SqlValue::Null);
        assert_eq!(values[7], SqlValue::Integer(1));
        assert_eq!(values[8], SqlValue::Integer(99));
        assert_eq!(values[9], SqlValue::Integer(0));
    }

    #[test]
    fn test_encode_structured_and_flags() {
        assert_eq!(
            encode_value("meta", ColumnType::Json, Some(&json!({"a": [1, 2]}))).unwrap(),
            SqlValue::Text("{\"a\":[1,2]}".to_string())
        );
        assert_eq!(
            encode_value("done", ColumnType::Boolean, Some(&json!(true))).unwrap(),
            SqlValue::Integer(1)
        );
        assert_eq!(
            encode_value("flag", ColumnType::Bit, Some(&json!(0))).unwrap(),
            SqlValue::Integer(0)
        );
        assert_eq!(
            encode_value("id", ColumnType::Integer, Some(&json!("42"))).unwrap(),
            SqlValue::Integer(42)
        );
    }

    #[test]
    fn test_encode_rejects_mismatches() {
        assert!(matches!(
            encode_value("flag", ColumnType::Bit, Some(&json!(2))),
            Err(Error::Codec { .. })
        ));
        assert!(matches!(
            encode_value("title", ColumnType::Text, Some(&json!({"x": 1}))),
            Err(Error::Codec { .. })
        ));
        assert!(matches!(
            encode_value("id", ColumnType::Integer, Some(&json!(1.5))),
            Err(Error::Codec { .. })
        ));
    }

    #[test]
    fn test_decode_nullability() {
        let nullable = Column::new("title", ColumnType::Text).nullable();
        let required = Column::new("title", ColumnType::Text);
        assert_eq!(
            decode_value(&nullable, SqlValue::Null).unwrap(),
            Some(Value::Null)
        );
        assert_eq!(decode_value(&required, SqlValue::Null).unwrap(), None);
    }

    #[test]
    fn test_decode_typed_values() {
        let done = Column::new("done", ColumnType::Boolean);
        let flag = Column::new("flag", ColumnType::Bit);
        let meta = Column::new("meta", ColumnType::Json);
        assert_eq!(
            decode_value(&done, SqlValue::Integer(1)).unwrap(),
            Some(json!(true))
        );
        assert_eq!(
            decode_value(&flag, SqlValue::Integer(1)).unwrap(),
            Some(json!(1))
        );
        assert_eq!(
            decode_value(&meta, SqlValue::Text("[1,{\"b\":null}]".into())).unwrap(),
            Some(json!([1, {"b": null}]))
        );
        assert!(decode_value(&meta, SqlValue::Text("{oops".into())).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stored_row_decodes_back_with_hydration() {
        let schema = schema();
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .execute(&schema.statements().create_table, Vec::new())
            .await
            .unwrap();

        let codec = RowCodec::new(schema.clone()).with_hydrator(Arc::new(|row: &mut Row| {
            let title = row.get_str("title").unwrap_or_default().to_uppercase();
            row.set("display", title);
        }));
        let row = Row::new()
            .with("id", 3)
            .with("title", "milk")
            .with("done", false)
            .with("flag", 1)
            .with("meta", json!({"tags": ["x"]}))
            .with("due", "2024-05-01")
            .with("score", 2.5);
        let params = codec.encode(&row, &SyncMeta::clean(5)).unwrap();
        store
            .execute(&schema.statements().insert, params)
            .await
            .unwrap();

        let decoded = store
            .with_connection(|conn| {
                let mut stmt = conn.prepare(&schema.statements().select_by_id)?;
                let mut rows = stmt.query([3])?;
                let stored = rows.next()?.ok_or_else(|| Error::NotFound("3".into()))?;
                codec.decode(stored)
            })
            .await
            .unwrap();

        let mut expected = row.clone();
        expected.set("display", "MILK");
        assert_eq!(decoded.row, expected);
        assert_eq!(decoded.meta, SyncMeta::clean(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_numeric_looking_dates_and_whole_reals_keep_their_type() {
        let schema = schema();
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .execute(&schema.statements().create_table, Vec::new())
            .await
            .unwrap();

        let codec = RowCodec::new(schema.clone());
        let cases = [
            (1, json!("2024"), json!(2.0)),
            (2, json!(1_700_000_000_000_i64), json!(2)),
            (3, json!("2024-05-01T10:00:00Z"), json!(-0.5)),
        ];
        for (id, due, score) in &cases {
            let row = Row::new()
                .with("id", *id)
                .with("done", true)
                .with("flag", 0)
                .with("due", due.clone())
                .with("score", score.clone());
            let params = codec.encode(&row, &SyncMeta::clean(1)).unwrap();
            store
                .execute(&schema.statements().insert, params)
                .await
                .unwrap();
        }

        for (id, due, score) in cases {
            let decoded = store
                .with_connection(|conn| {
                    let mut stmt = conn.prepare(&schema.statements().select_by_id)?;
                    let mut rows = stmt.query([id])?;
                    let stored = rows.next()?.ok_or_else(|| Error::NotFound(id.to_string()))?;
                    codec.decode(stored)
                })
                .await
                .unwrap();
            assert_eq!(decoded.row.get("due"), Some(&due));
            assert_eq!(decoded.row.get("score"), Some(&score));
        }
    }
}
