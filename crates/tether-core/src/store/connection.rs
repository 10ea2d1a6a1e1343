//! `SQLite` connection management

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;

use crate::config::TableMode;
use crate::error::Result;
use crate::schema::{quote, TableSchema, CHECKPOINT_TABLE};

/// Rows returned by [`LocalStore::query`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `index`
    pub fn value(&self, index: usize, column: &str) -> Option<&SqlValue> {
        let position = self.columns.iter().position(|name| name == column)?;
        self.rows.get(index)?.get(position)
    }
}

/// The on-device store: a single logical connection shared by every table
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Open a store at the given path, creating it if it doesn't exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        configure(&conn)?;
        tracing::debug!("Opened local store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Execute one parameterized statement, returning the number of changed rows
    pub async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<usize> {
        tracing::trace!(sql, ?params, "execute");
        self.with_connection(|conn| Ok(conn.execute(sql, params_from_iter(params.iter()))?))
            .await
    }

    /// Run one parameterized query and collect every row
    pub async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<ResultSet> {
        tracing::trace!(sql, ?params, "query");
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            let width = columns.len();
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    (0..width)
                        .map(|index| row.get::<_, SqlValue>(index))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ResultSet { columns, rows })
        })
        .await
    }

    /// Run `f` while holding the connection.
    ///
    /// Failures are logged here and returned to the caller unchanged.
    pub async fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().await;
        f(&conn).inspect_err(|error| tracing::error!("Local store failure: {error}"))
    }

    /// Run `f` inside a transaction, committing on success
    pub async fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().await;
        let result: Result<T> = (|| {
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })();
        result.inspect_err(|error| tracing::error!("Local store transaction failed: {error}"))
    }

    /// Create the table for `schema` and make sure its deletion checkpoint exists.
    ///
    /// New checkpoints are seeded with `now` so a fresh install does not
    /// replay the server's whole deletion history.
    pub async fn create_table(&self, schema: &TableSchema, mode: TableMode, now: i64) -> Result<()> {
        let statements = schema.statements();
        let checkpoint = quote(CHECKPOINT_TABLE);
        self.transaction(|tx| {
            if mode == TableMode::Recreate {
                tx.execute(&statements.drop_table, [])?;
            }
            tx.execute(&statements.create_table, [])?;
            tx.execute(&statements.create_modified_index, [])?;
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {checkpoint} (
                        tableName TEXT PRIMARY KEY,
                        lastSeenDeletionTime INTEGER NOT NULL
                    )"
                ),
                [],
            )?;
            let seed = match mode {
                TableMode::Preserve => "INSERT OR IGNORE",
                TableMode::Recreate => "INSERT OR REPLACE",
            };
            tx.execute(
                &format!(
                    "{seed} INTO {checkpoint} (tableName, lastSeenDeletionTime) VALUES (?, ?)"
                ),
                params![schema.name(), now],
            )?;
            Ok(())
        })
        .await?;

        tracing::info!(table = schema.name(), ?mode, "Local table ready");
        Ok(())
    }

    /// Deletion checkpoint for `table`, if one was seeded
    pub async fn checkpoint(&self, table: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT lastSeenDeletionTime FROM {} WHERE tableName = ?",
            quote(CHECKPOINT_TABLE)
        );
        self.with_connection(|conn| {
            Ok(conn
                .query_row(&sql, params![table], |row| row.get(0))
                .optional()?)
        })
        .await
    }

    /// Move the checkpoint of `table` forward to `time`; never moves it back.
    ///
    /// Returns the stored checkpoint.
    pub async fn advance_checkpoint(&self, table: &str, time: i64) -> Result<i64> {
        let checkpoint = quote(CHECKPOINT_TABLE);
        self.transaction(|tx| {
            tx.execute(
                &format!(
                    "INSERT INTO {checkpoint} (tableName, lastSeenDeletionTime) VALUES (?1, ?2)
                     ON CONFLICT(tableName) DO UPDATE
                     SET lastSeenDeletionTime = MAX(lastSeenDeletionTime, excluded.lastSeenDeletionTime)"
                ),
                params![table, time],
            )?;
            Ok(tx.query_row(
                &format!("SELECT lastSeenDeletionTime FROM {checkpoint} WHERE tableName = ?"),
                params![table],
                |row| row.get(0),
            )?)
        })
        .await
    }
}

/// Configure `SQLite` for a single-writer local cache
fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases report "memory" and keep working
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}
