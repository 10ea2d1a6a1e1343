//! Per-table row storage

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::LocalStore;
use crate::codec::RowCodec;
use crate::config::TableMode;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::models::{LocalRow, Row, SyncMeta};
use crate::schema::{quote, TableSchema};

/// Synchronous row operations on a borrowed connection.
///
/// Callers hold the store lock (or a transaction) for the whole sequence.
pub(crate) struct TableRows<'a> {
    conn: &'a Connection,
    codec: &'a RowCodec,
}

impl<'a> TableRows<'a> {
    pub(crate) const fn new(conn: &'a Connection, codec: &'a RowCodec) -> Self {
        Self { conn, codec }
    }

    pub(crate) fn schema(&self) -> &TableSchema {
        self.codec.schema()
    }

    /// Stored row at `key`, soft-deleted or not, without hydration
    pub(crate) fn get_raw(&self, key: i64) -> Result<Option<LocalRow>> {
        let mut stmt = self
            .conn
            .prepare_cached(&self.schema().statements().select_by_id)?;
        let mut rows = stmt.query(params![key])?;
        rows.next()?
            .map(|stored| self.codec.decode_raw(stored))
            .transpose()
    }

    /// Next temporary key: one below the smallest key in use, and always negative
    pub(crate) fn next_temp_key(&self) -> Result<i64> {
        let min: Option<i64> = self
            .conn
            .query_row(&self.schema().statements().select_min_id, [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();
        Ok(min.unwrap_or(0).min(0) - 1)
    }

    pub(crate) fn insert(&self, row: &Row, meta: &SyncMeta) -> Result<()> {
        let values = self.codec.encode(row, meta)?;
        self.conn.execute(
            &self.schema().statements().insert,
            params_from_iter(values.iter()),
        )?;
        Ok(())
    }

    /// Overwrite every column of the row stored at `slot`, including its key
    pub(crate) fn write_slot(&self, slot: i64, row: &Row, meta: &SyncMeta) -> Result<usize> {
        let mut values = self.codec.encode(row, meta)?;
        values.push(SqlValue::Integer(slot));
        Ok(self.conn.execute(
            &self.schema().statements().update_by_slot,
            params_from_iter(values.iter()),
        )?)
    }

    /// Move the row at `slot` to `key` without touching any other column
    pub(crate) fn move_key(&self, slot: i64, key: i64) -> Result<usize> {
        let schema = self.schema();
        let pk = quote(schema.primary_key());
        Ok(self.conn.execute(
            &format!(
                "UPDATE {} SET {pk} = ? WHERE {pk} = ?",
                quote(schema.name())
            ),
            params![key, slot],
        )?)
    }

    /// Row at `key` as just written; missing only if the write did not land
    pub(crate) fn reread(&self, key: i64) -> Result<LocalRow> {
        self.get_raw(key)?.ok_or_else(|| {
            Error::Database(format!("`{}` row {key} vanished after write", self.schema().name()))
        })
    }

    pub(crate) fn delete(&self, key: i64) -> Result<usize> {
        Ok(self
            .conn
            .execute(&self.schema().statements().delete_by_id, params![key])?)
    }

    /// Rows matching `filter`, ordered by key so pending inserts come first
    pub(crate) fn select(&self, filter: &Filter) -> Result<Vec<LocalRow>> {
        let schema = self.schema();
        let (clauses, values) = filter.to_sql(schema)?;
        let sql = format!(
            "{}{clauses} ORDER BY {}",
            schema.statements().select_base,
            quote(schema.primary_key())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut found = Vec::new();
        while let Some(stored) = rows.next()? {
            found.push(self.codec.decode_raw(stored)?);
        }
        Ok(found)
    }
}

/// Async handle on one synced table inside a [`LocalStore`]
#[derive(Debug, Clone)]
pub struct TableStore {
    store: LocalStore,
    codec: RowCodec,
}

impl TableStore {
    /// Create the table if needed (or recreate it) and return a handle on it
    pub async fn open(store: LocalStore, codec: RowCodec, mode: TableMode, now: i64) -> Result<Self> {
        store.create_table(codec.schema(), mode, now).await?;
        Ok(Self { store, codec })
    }

    pub fn schema(&self) -> &TableSchema {
        self.codec.schema()
    }

    pub const fn codec(&self) -> &RowCodec {
        &self.codec
    }

    /// Run a multi-statement sequence on this table inside one transaction
    pub(crate) async fn transaction<T>(
        &self,
        f: impl FnOnce(&TableRows<'_>) -> Result<T>,
    ) -> Result<T> {
        let codec = &self.codec;
        self.store
            .transaction(|tx| f(&TableRows::new(tx, codec)))
            .await
    }

    async fn with_rows<T>(&self, f: impl FnOnce(&TableRows<'_>) -> Result<T>) -> Result<T> {
        let codec = &self.codec;
        self.store
            .with_connection(|conn| f(&TableRows::new(conn, codec)))
            .await
    }

    /// Stored row at `key`, hydrated. Soft-deleted rows are returned too.
    pub async fn get(&self, key: i64) -> Result<Option<LocalRow>> {
        let row = self.get_raw(key).await?;
        Ok(row.map(|row| self.codec.hydrate(row)))
    }

    /// Stored row at `key` as written, without hydration
    pub async fn get_raw(&self, key: i64) -> Result<Option<LocalRow>> {
        self.with_rows(|rows| rows.get_raw(key)).await
    }

    /// Hydrated rows matching `filter`; with `pending_only` only rows still
    /// waiting for a server key
    pub async fn select(&self, filter: &Filter, pending_only: bool) -> Result<Vec<LocalRow>> {
        let pk = self.schema().primary_key();
        let rows = self.with_rows(|rows| rows.select(filter)).await?;
        Ok(rows
            .into_iter()
            .filter(|row| !pending_only || row.is_unconfirmed(pk))
            .map(|row| self.codec.hydrate(row))
            .collect())
    }

    /// Store `row` under a fresh temporary key as a pending insert.
    ///
    /// The key is minted under the same lock as the insert, so concurrent
    /// callers always receive distinct keys.
    pub async fn insert_pending(&self, mut row: Row, now: i64) -> Result<LocalRow> {
        let pk = self.schema().primary_key().to_string();
        let meta = SyncMeta::pending(now);
        let stored = self
            .transaction(|rows| {
                let key = rows.next_temp_key()?;
                row.set_key(&pk, key);
                rows.insert(&row, &meta)?;
                rows.reread(key)
            })
            .await?;
        tracing::debug!(table = self.schema().name(), key = stored.key(&pk), "Stored pending insert");
        Ok(self.codec.hydrate(stored))
    }

    /// Store a server-confirmed row as clean, replacing any row at its key
    pub async fn insert_clean(&self, row: Row, now: i64) -> Result<LocalRow> {
        let key = self.require_key(&row)?;
        let meta = SyncMeta::clean(now);
        let stored = self
            .transaction(|rows| {
                rows.delete(key)?;
                rows.insert(&row, &meta)?;
                rows.reread(key)
            })
            .await?;
        Ok(self.codec.hydrate(stored))
    }

    /// Replace the whole visible row at the key of `row` and mark it modified
    pub async fn update_local(&self, row: Row, now: i64) -> Result<LocalRow> {
        let key = self.require_key(&row)?;
        let meta = SyncMeta::pending(now);
        let name = self.schema().name().to_string();
        let stored = self
            .transaction(|rows| {
                match rows.get_raw(key)? {
                    Some(existing) if !existing.meta.deleted => {}
                    _ => return Err(Error::NotFound(format!("{name} {key}"))),
                }
                rows.write_slot(key, &row, &meta)?;
                rows.reread(key)
            })
            .await?;
        Ok(self.codec.hydrate(stored))
    }

    /// Mark the row at `key` deleted and modified.
    ///
    /// Fails with `NotFound` when no visible row exists.
    pub async fn soft_delete(&self, key: i64, now: i64) -> Result<LocalRow> {
        let name = self.schema().name().to_string();
        let row = self
            .transaction(|rows| {
                let Some(mut existing) = rows.get_raw(key)?.filter(|row| !row.meta.deleted) else {
                    return Err(Error::NotFound(format!("{name} {key}")));
                };
                existing.meta = SyncMeta {
                    modified: true,
                    modified_date: now,
                    deleted: true,
                };
                rows.write_slot(key, &existing.row, &existing.meta)?;
                Ok(existing)
            })
            .await?;
        Ok(row)
    }

    /// Remove the row at `key`; returns whether a row existed
    pub async fn hard_delete(&self, key: i64) -> Result<bool> {
        let removed = self.with_rows(|rows| rows.delete(key)).await?;
        Ok(removed > 0)
    }

    /// Every row with unconfirmed local changes, as stored (no hydration)
    pub async fn modified_rows(&self) -> Result<Vec<LocalRow>> {
        let filter = Filter::new().modified();
        self.with_rows(|rows| rows.select(&filter)).await
    }

    pub async fn count_modified(&self) -> Result<usize> {
        let sql = &self.schema().statements().count_modified;
        let count: i64 = self
            .store
            .with_connection(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Deletion checkpoint of this table (0 when never seeded)
    pub async fn checkpoint(&self) -> Result<i64> {
        Ok(self
            .store
            .checkpoint(self.schema().name())
            .await?
            .unwrap_or_default())
    }

    pub async fn advance_checkpoint(&self, time: i64) -> Result<i64> {
        self.store
            .advance_checkpoint(self.schema().name(), time)
            .await
    }

    fn require_key(&self, row: &Row) -> Result<i64> {
        let pk = self.schema().primary_key();
        row.key(pk).ok_or_else(|| {
            Error::InvalidInput(format!(
                "row for `{}` has no integer `{pk}`",
                self.schema().name()
            ))
        })
    }
}
