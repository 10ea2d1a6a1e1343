//! Domain rows and their local sync metadata

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row in its domain form: column name to JSON value.
///
/// A missing key means "undefined" and is stored as NULL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    /// Read an integer key column
    pub fn key(&self, pk: &str) -> Option<i64> {
        self.0.get(pk).and_then(Value::as_i64)
    }

    pub fn set_key(&mut self, pk: &str, key: i64) {
        self.0.insert(pk.to_string(), Value::from(key));
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay every value of `other` onto this row
    pub fn merge(&mut self, other: &Self) {
        for (column, value) in &other.0 {
            self.0.insert(column.clone(), value.clone());
        }
    }

    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Row {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        )
    }
}

/// Private sync state stored alongside every local row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Local changes not yet confirmed by the server (`_localModified`)
    pub modified: bool,
    /// Timestamp of the last local write, Unix ms (`_localModifiedDate`)
    pub modified_date: i64,
    /// Soft-deleted, hidden from user-facing reads (`_localDelete`)
    pub deleted: bool,
}

impl SyncMeta {
    /// Metadata for a row adopted from the server
    pub const fn clean(now: i64) -> Self {
        Self {
            modified: false,
            modified_date: now,
            deleted: false,
        }
    }

    /// Metadata for a row written locally
    pub const fn pending(now: i64) -> Self {
        Self {
            modified: true,
            modified_date: now,
            deleted: false,
        }
    }
}

/// Where a row sits in the local sync lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowState {
    Clean,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
}

/// A row as held in local storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRow {
    pub row: Row,
    pub meta: SyncMeta,
}

impl LocalRow {
    pub const fn new(row: Row, meta: SyncMeta) -> Self {
        Self { row, meta }
    }

    pub fn key(&self, pk: &str) -> Option<i64> {
        self.row.key(pk)
    }

    pub fn state(&self, pk: &str) -> RowState {
        if self.meta.deleted {
            RowState::PendingDelete
        } else if !self.meta.modified {
            RowState::Clean
        } else if self.key(pk).is_some_and(|key| key < 0) {
            RowState::PendingCreate
        } else {
            RowState::PendingUpdate
        }
    }

    /// Still waiting for the server to assign a key
    pub fn is_unconfirmed(&self, pk: &str) -> bool {
        self.key(pk).is_some_and(|key| key < 0)
    }
}
