//! Row filters shared by the local and remote query paths
//!
//! Absent (`null`) values are ignored, text columns match by substring
//! (an empty string is ignored), every other type matches exactly.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::encode_value;
use crate::error::{Error, Result};
use crate::models::Row;
use crate::schema::{quote, ColumnType, TableSchema, LOCAL_DELETE, LOCAL_MODIFIED};

/// Column to value filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, Value>);

/// How one filter entry is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Substring,
    Exact,
}

/// One effective filter entry, after ignored entries are dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Clause<'a> {
    pub column: &'a str,
    pub column_type: ColumnType,
    pub kind: MatchKind,
    pub value: &'a Value,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// This filter restricted to rows not soft-deleted
    #[must_use]
    pub fn visible(self) -> Self {
        self.with(LOCAL_DELETE, 0)
    }

    /// This filter restricted to rows with unconfirmed local changes
    #[must_use]
    pub fn modified(self) -> Self {
        self.with(LOCAL_MODIFIED, 1)
    }

    /// The application-column part of this filter, as sent to the remote API
    #[must_use]
    pub fn without_private(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(column, _)| !column.starts_with('_'))
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect(),
        )
    }

    /// Resolve the entries that actually constrain rows
    pub fn clauses<'a>(&'a self, schema: &TableSchema) -> Result<Vec<Clause<'a>>> {
        let mut clauses = Vec::new();
        for (column, value) in &self.0 {
            let column_type = schema.filter_type(column).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "cannot filter `{}` on unknown column `{column}`",
                    schema.name()
                ))
            })?;
            if value.is_null() {
                continue;
            }
            let kind = if column_type == ColumnType::Text {
                if value.as_str().is_some_and(str::is_empty) {
                    continue;
                }
                MatchKind::Substring
            } else {
                MatchKind::Exact
            };
            clauses.push(Clause {
                column,
                column_type,
                kind,
                value,
            });
        }
        Ok(clauses)
    }

    /// Render as `AND ...` SQL fragments plus their bound parameters
    pub fn to_sql(&self, schema: &TableSchema) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = String::new();
        let mut params = Vec::new();
        for clause in self.clauses(schema)? {
            let column = quote(clause.column);
            match clause.kind {
                MatchKind::Substring => {
                    sql.push_str(&format!(" AND {column} LIKE '%' || ? || '%'"));
                }
                MatchKind::Exact => sql.push_str(&format!(" AND {column} = ?")),
            }
            params.push(encode_value(
                clause.column,
                clause.column_type,
                Some(clause.value),
            )?);
        }
        Ok((sql, params))
    }

    /// Apply the same semantics to an in-memory row.
    ///
    /// Only application columns are considered; private sync columns never
    /// exist outside local storage.
    pub fn matches(&self, row: &Row, schema: &TableSchema) -> Result<bool> {
        for clause in self.clauses(schema)? {
            if clause.column.starts_with('_') && schema.column(clause.column).is_none() {
                continue;
            }
            let expected = encode_value(clause.column, clause.column_type, Some(clause.value))?;
            let actual = match row.get(clause.column) {
                Some(value) => encode_value(clause.column, clause.column_type, Some(value))?,
                None => SqlValue::Null,
            };
            let matched = match (clause.kind, &expected, &actual) {
                (MatchKind::Substring, SqlValue::Text(needle), SqlValue::Text(haystack)) => {
                    haystack.to_lowercase().contains(&needle.to_lowercase())
                }
                (MatchKind::Substring, _, _) => false,
                (MatchKind::Exact, expected, actual) => expected == actual,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Query-string pairs for the remote API (private columns excluded)
    pub fn query_pairs(&self, schema: &TableSchema) -> Result<Vec<(String, String)>> {
        let public = self.without_private();
        Ok(public
            .clauses(schema)?
            .into_iter()
            .map(|clause| {
                let value = match clause.value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (clause.column.to_string(), value)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn schema() -> TableSchema {
        TableSchema::builder("todos", "id")
            .column("id", ColumnType::Integer)
            .nullable_column("title", ColumnType::Text)
            .nullable_column("completed", ColumnType::Bit)
            .build()
            .unwrap()
    }

    #[test]
    fn test_ignores_null_and_empty_text() {
        let filter = Filter::new()
            .with("title", "")
            .with("completed", Value::Null);
        let (sql, params) = filter.to_sql(&schema()).unwrap();
        assert_eq!(sql, "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_text_is_substring_and_others_exact() {
        let filter = Filter::new().with("title", "milk").with("completed", 1).visible();
        let (sql, params) = filter.to_sql(&schema()).unwrap();
        assert_eq!(
            sql,
            " AND \"_localDelete\" = ? AND \"completed\" = ? AND \"title\" LIKE '%' || ? || '%'"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Integer(0),
                SqlValue::Integer(1),
                SqlValue::Text("milk".into())
            ]
        );
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let filter = Filter::new().with("nope", 1);
        assert!(matches!(
            filter.to_sql(&schema()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_matches_in_memory() {
        let schema = schema();
        let row = Row::new()
            .with("id", 1)
            .with("title", "Buy milk")
            .with("completed", 0);

        assert!(Filter::new().with("title", "milk").matches(&row, &schema).unwrap());
        assert!(Filter::new().with("title", "").matches(&row, &schema).unwrap());
        assert!(Filter::new().with("completed", false).matches(&row, &schema).unwrap());
        assert!(!Filter::new().with("completed", 1).matches(&row, &schema).unwrap());
        assert!(!Filter::new().with("title", "bread").matches(&row, &schema).unwrap());
        assert!(Filter::new().visible().matches(&row, &schema).unwrap());
    }

    #[test]
    fn test_query_pairs_skip_private_columns() {
        let filter = Filter::new().with("title", "milk").visible();
        assert_eq!(
            filter.query_pairs(&schema()).unwrap(),
            vec![("title".to_string(), "milk".to_string())]
        );
    }
}
