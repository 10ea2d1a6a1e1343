//! Table schema descriptors
//!
//! A [`TableSchema`] names the table, its integer primary key and its typed
//! columns. Every SQL statement the store needs is generated once, when the
//! schema is built, and reused for the lifetime of the engine.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Set while a row has local changes the server has not confirmed yet.
pub const LOCAL_MODIFIED: &str = "_localModified";
/// Timestamp (Unix ms) of the last local write.
pub const LOCAL_MODIFIED_DATE: &str = "_localModifiedDate";
/// Soft-delete marker.
pub const LOCAL_DELETE: &str = "_localDelete";

/// Private sync columns appended to every local table
pub const SYNC_COLUMNS: [&str; 3] = [LOCAL_MODIFIED, LOCAL_MODIFIED_DATE, LOCAL_DELETE];

/// Shared table holding one deletion checkpoint per synced table
pub const CHECKPOINT_TABLE: &str = "lastSeenDeletion";

/// Semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Any JSON number
    Number,
    /// 64-bit integer
    Integer,
    /// UTF-8 text, filtered by substring
    Text,
    /// `0 | 1`
    Bit,
    /// `true | false`, stored as `0 | 1`
    Boolean,
    /// ISO-8601 text or epoch milliseconds
    Date,
    /// Structured value, stored as JSON text
    Json,
}

impl ColumnType {
    /// `SQLite` type affinity used in the generated DDL
    pub const fn sql_type(self) -> &'static str {
        match self {
            // BLOB affinity stores values exactly as bound: 2.0 stays real, "2024" stays text
            Self::Number | Self::Date => "BLOB",
            Self::Integer | Self::Bit | Self::Boolean => "INTEGER",
            Self::Text | Self::Json => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Bit => "bit",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// A declared application column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Prepared SQL for one table, generated once per schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statements {
    pub create_table: String,
    pub create_modified_index: String,
    pub drop_table: String,
    pub select_by_id: String,
    pub select_min_id: String,
    /// `SELECT ... WHERE 1 = 1`, extended with filter clauses
    pub select_base: String,
    pub insert: String,
    /// Binds every column followed by the slot key
    pub update_by_slot: String,
    pub delete_by_id: String,
    pub count_modified: String,
}

/// Schema of one synced table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    primary_key: String,
    columns: Vec<Column>,
    statements: Statements,
}

/// Serializable schema definition, validated into a [`TableSchema`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub primary_key: String,
    pub columns: Vec<Column>,
}

impl TryFrom<TableDefinition> for TableSchema {
    type Error = Error;

    fn try_from(value: TableDefinition) -> Result<Self> {
        let mut builder = TableSchemaBuilder::new(value.name, value.primary_key);
        builder.columns = value.columns;
        builder.build()
    }
}

/// Builder for [`TableSchema`]
#[derive(Debug, Clone)]
pub struct TableSchemaBuilder {
    name: String,
    primary_key: String,
    columns: Vec<Column>,
}

impl TableSchemaBuilder {
    fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            columns: Vec::new(),
        }
    }

    /// Add a non-nullable column
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column::new(name, column_type));
        self
    }

    /// Add a nullable column
    #[must_use]
    pub fn nullable_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column::new(name, column_type).nullable());
        self
    }

    /// Validate the descriptor and generate its statements
    pub fn build(self) -> Result<TableSchema> {
        validate_identifier(&self.name)?;
        if self.name == CHECKPOINT_TABLE {
            return Err(Error::Schema(format!(
                "table name `{CHECKPOINT_TABLE}` is reserved"
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            validate_identifier(&column.name)?;
            if SYNC_COLUMNS.contains(&column.name.as_str()) {
                return Err(Error::Schema(format!(
                    "column `{}` collides with a private sync column",
                    column.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::Schema(format!(
                    "column `{}` is declared twice",
                    column.name
                )));
            }
        }

        let pk = self
            .columns
            .iter()
            .find(|column| column.name == self.primary_key)
            .ok_or_else(|| {
                Error::Schema(format!(
                    "primary key `{}` is not a declared column",
                    self.primary_key
                ))
            })?;
        if pk.column_type != ColumnType::Integer {
            return Err(Error::Schema(format!(
                "primary key `{}` must be an integer column",
                self.primary_key
            )));
        }

        let statements = generate_statements(&self.name, &self.primary_key, &self.columns);
        Ok(TableSchema {
            name: self.name,
            primary_key: self.primary_key,
            columns: self.columns,
            statements,
        })
    }
}

impl TableSchema {
    /// Start describing a table keyed by the integer column `primary_key`
    pub fn builder(name: impl Into<String>, primary_key: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder::new(name, primary_key)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Application columns, in storage order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub const fn statements(&self) -> &Statements {
        &self.statements
    }

    /// Serializable form of this schema
    pub fn definition(&self) -> TableDefinition {
        TableDefinition {
            name: self.name.clone(),
            primary_key: self.primary_key.clone(),
            columns: self.columns.clone(),
        }
    }

    /// Resolve the semantic type of a filterable column (application or private)
    pub fn filter_type(&self, name: &str) -> Option<ColumnType> {
        if let Some(column) = self.column(name) {
            return Some(column.column_type);
        }
        match name {
            LOCAL_MODIFIED | LOCAL_DELETE => Some(ColumnType::Bit),
            LOCAL_MODIFIED_DATE => Some(ColumnType::Integer),
            _ => None,
        }
    }
}

/// Quote an already validated identifier for use in SQL
pub fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn validate_identifier(identifier: &str) -> Result<()> {
    let mut chars = identifier.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::Schema(format!("invalid identifier `{identifier}`")))
    }
}

fn generate_statements(table: &str, pk: &str, columns: &[Column]) -> Statements {
    let table_q = quote(table);
    let pk_q = quote(pk);

    let all_columns: Vec<String> = columns
        .iter()
        .map(|column| quote(&column.name))
        .chain(SYNC_COLUMNS.iter().map(|name| quote(name)))
        .collect();
    let column_list = all_columns.join(", ");
    let placeholders = vec!["?"; all_columns.len()].join(", ");
    let assignments = all_columns
        .iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");

    let definitions = columns
        .iter()
        .map(|column| {
            if column.name == pk {
                format!("{} INTEGER PRIMARY KEY", quote(&column.name))
            } else {
                format!("{} {}", quote(&column.name), column.column_type.sql_type())
            }
        })
        .chain(
            SYNC_COLUMNS
                .iter()
                .map(|name| format!("{} INTEGER NOT NULL DEFAULT 0", quote(name))),
        )
        .collect::<Vec<_>>()
        .join(",\n    ");

    Statements {
        create_table: format!("CREATE TABLE IF NOT EXISTS {table_q} (\n    {definitions}\n)"),
        create_modified_index: format!(
            "CREATE INDEX IF NOT EXISTS {} ON {table_q}({})",
            quote(&format!("idx_{table}_local_modified")),
            quote(LOCAL_MODIFIED)
        ),
        drop_table: format!("DROP TABLE IF EXISTS {table_q}"),
        select_by_id: format!("SELECT {column_list} FROM {table_q} WHERE {pk_q} = ?"),
        select_min_id: format!("SELECT MIN({pk_q}) FROM {table_q}"),
        select_base: format!("SELECT {column_list} FROM {table_q} WHERE 1 = 1"),
        insert: format!("INSERT INTO {table_q} ({column_list}) VALUES ({placeholders})"),
        update_by_slot: format!("UPDATE {table_q} SET {assignments} WHERE {pk_q} = ?"),
        delete_by_id: format!("DELETE FROM {table_q} WHERE {pk_q} = ?"),
        count_modified: format!(
            "SELECT COUNT(*) FROM {table_q} WHERE {} = 1",
            quote(LOCAL_MODIFIED)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn todos() -> TableSchema {
        TableSchema::builder("todos", "id")
            .column("id", ColumnType::Integer)
            .nullable_column("title", ColumnType::Text)
            .column("completed", ColumnType::Bit)
            .build()
            .unwrap()
    }

    #[test]
    fn test_generates_statements_once() {
        let schema = todos();
        let statements = schema.statements();
        assert_eq!(
            statements.select_by_id,
            "SELECT \"id\", \"title\", \"completed\", \"_localModified\", \"_localModifiedDate\", \"_localDelete\" FROM \"todos\" WHERE \"id\" = ?"
        );
        assert_eq!(
            statements.insert,
            "INSERT INTO \"todos\" (\"id\", \"title\", \"completed\", \"_localModified\", \"_localModifiedDate\", \"_localDelete\") VALUES (?, ?, ?, ?, ?, ?)"
        );
        assert!(statements.create_table.contains("\"id\" INTEGER PRIMARY KEY"));
        assert!(statements
            .create_table
            .contains("\"_localDelete\" INTEGER NOT NULL DEFAULT 0"));
        assert!(statements.update_by_slot.ends_with("WHERE \"id\" = ?"));
    }

    #[test]
    fn test_rejects_invalid_identifiers() {
        let result = TableSchema::builder("todos; DROP", "id")
            .column("id", ColumnType::Integer)
            .build();
        assert!(matches!(result, Err(Error::Schema(_))));

        let result = TableSchema::builder("todos", "id")
            .column("id", ColumnType::Integer)
            .column("1st", ColumnType::Text)
            .build();
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_rejects_private_and_duplicate_columns() {
        let result = TableSchema::builder("todos", "id")
            .column("id", ColumnType::Integer)
            .column("_localDelete", ColumnType::Bit)
            .build();
        assert!(matches!(result, Err(Error::Schema(_))));

        let result = TableSchema::builder("todos", "id")
            .column("id", ColumnType::Integer)
            .column("title", ColumnType::Text)
            .column("title", ColumnType::Text)
            .build();
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_primary_key_must_be_declared_integer() {
        let missing = TableSchema::builder("todos", "id")
            .column("title", ColumnType::Text)
            .build();
        assert!(matches!(missing, Err(Error::Schema(_))));

        let wrong_type = TableSchema::builder("todos", "id")
            .column("id", ColumnType::Text)
            .build();
        assert!(matches!(wrong_type, Err(Error::Schema(_))));
    }

    #[test]
    fn test_definition_from_json() {
        let definition: TableDefinition = serde_json::from_str(
            r#"{
                "name": "todos",
                "primary_key": "id",
                "columns": [
                    {"name": "id", "type": "integer"},
                    {"name": "title", "type": "text", "nullable": true},
                    {"name": "meta", "type": "json", "nullable": true}
                ]
            }"#,
        )
        .unwrap();
        let schema = TableSchema::try_from(definition).unwrap();
        assert_eq!(schema.column("meta").unwrap().column_type, ColumnType::Json);
        assert!(schema.column("title").unwrap().nullable);
        assert_eq!(schema.definition().columns.len(), 3);
    }

    #[test]
    fn test_filter_type_covers_private_columns() {
        let schema = todos();
        assert_eq!(schema.filter_type("title"), Some(ColumnType::Text));
        assert_eq!(schema.filter_type(LOCAL_MODIFIED), Some(ColumnType::Bit));
        assert_eq!(schema.filter_type("missing"), None);
    }
}
