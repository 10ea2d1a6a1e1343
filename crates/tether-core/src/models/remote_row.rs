//! Rows as returned by the remote API

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::Row;

/// Name of the server revision column on the wire
pub const MODIFIED_DATE: &str = "modifiedDate";

/// A server row: the domain columns plus the server-assigned `modifiedDate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    #[serde(
        rename = "modifiedDate",
        default,
        deserialize_with = "deserialize_timestamp"
    )]
    pub modified_date: i64,
    #[serde(flatten)]
    pub row: Row,
}

impl RemoteRow {
    pub const fn new(row: Row, modified_date: i64) -> Self {
        Self { modified_date, row }
    }

    pub fn key(&self, pk: &str) -> Option<i64> {
        self.row.key(pk)
    }

    /// The domain row including `modifiedDate`, so schemas that declare the
    /// column keep a copy of the server revision locally
    pub fn to_row(&self) -> Row {
        let mut row = self.row.clone();
        row.set(MODIFIED_DATE, self.modified_date);
        row
    }
}

// Postgres `bigint` columns reach JSON as strings.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| {
                #[allow(clippy::cast_possible_truncation)]
                number.as_f64().map(|value| value as i64)
            })
            .ok_or_else(|| serde::de::Error::custom("modifiedDate is out of range")),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|error| serde::de::Error::custom(format!("invalid modifiedDate: {error}"))),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "modifiedDate must be a number, got {other}"
        ))),
    }
}
