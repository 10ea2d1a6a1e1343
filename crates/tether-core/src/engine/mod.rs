//! Per-table sync engine
//!
//! Local writes are applied and awaited before returning; the matching remote
//! call runs as a tracked background task. Failed confirmations are counted
//! and replayed by the retry loop in [`retry`].

mod retry;


use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

pub use retry::SyncPass;

use crate::clock::{Clock, MonotonicClock};
use crate::codec::{Hydrator, RowCodec};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::models::{LocalRow, RemoteRow, Row};
use crate::reconcile::{reconcile, Reconciled, Resolution};
use crate::remote::RemoteApi;
use crate::schema::TableSchema;
use crate::store::{LocalStore, TableStore};

/// Snapshot of the engine's sync bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// Confirmations known to have failed since the last retry pass
    pub failed: usize,
    /// Foreground operations whose remote confirmation is still running
    pub in_flight: usize,
    /// Rows with unconfirmed local changes
    pub pending: usize,
    /// Deletion checkpoint (Unix ms)
    pub checkpoint: i64,
}

struct Inner {
    store: TableStore,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    failed: AtomicUsize,
    in_flight: AtomicUsize,
    tasks: Mutex<JoinSet<()>>,
    sync_loop: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Sync engine for one table. Cheap to clone; clones share state.
///
/// Call [`SyncEngine::shutdown`] before dropping the last handle so the
/// retry loop and pending confirmations are joined.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("table", &self.schema().name())
            .field("failed", &self.inner.failed.load(Ordering::SeqCst))
            .field("in_flight", &self.inner.in_flight.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    schema: Arc<TableSchema>,
    remote: Arc<dyn RemoteApi>,
    clock: Option<Arc<dyn Clock>>,
    hydrator: Option<Hydrator>,
    config: EngineConfig,
}

impl SyncEngineBuilder {
    /// Source of local write timestamps (defaults to a monotonic wall clock)
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Hook run once on every row handed to callers
    #[must_use]
    pub fn hydrator(mut self, hydrator: Hydrator) -> Self {
        self.hydrator = Some(hydrator);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Prepare the local table inside `store` and return the engine
    pub async fn open(self, store: LocalStore) -> Result<SyncEngine> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let mut codec = RowCodec::new(self.schema);
        if let Some(hydrator) = self.hydrator {
            codec = codec.with_hydrator(hydrator);
        }
        let store = TableStore::open(store, codec, self.config.table_mode, clock.now_millis()).await?;

        Ok(SyncEngine {
            inner: Arc::new(Inner {
                store,
                remote: self.remote,
                clock,
                config: self.config,
                failed: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                tasks: Mutex::new(JoinSet::new()),
                sync_loop: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }
}

/// Counts one foreground operation from its local write until its remote
/// confirmation settles
struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlightGuard {
    fn new(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: Arc::clone(inner),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn builder(schema: Arc<TableSchema>, remote: Arc<dyn RemoteApi>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            schema,
            remote,
            clock: None,
            hydrator: None,
            config: EngineConfig::default(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        self.inner.store.schema()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn table(&self) -> &TableStore {
        &self.inner.store
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    fn pk(&self) -> &str {
        self.schema().primary_key()
    }

    fn key_of(&self, row: &Row) -> Result<i64> {
        row.key(self.pk()).ok_or_else(|| {
            Error::InvalidInput(format!(
                "row for `{}` has no integer `{}`",
                self.schema().name(),
                self.pk()
            ))
        })
    }

    /// Declared columns only; hydrated fields and sync metadata stay local
    fn remote_payload(&self, row: &Row) -> Row {
        self.schema()
            .columns()
            .iter()
            .filter_map(|column| {
                row.get(&column.name)
                    .map(|value| (column.name.clone(), value.clone()))
            })
            .collect()
    }

    // Write path

    /// Store `row` under a temporary key and confirm it with the server in
    /// the background
    pub async fn create(&self, row: Row) -> Result<LocalRow> {
        let guard = InFlightGuard::new(&self.inner);
        let local = self.inner.store.insert_pending(row, self.now()).await?;
        let slot = self.key_of(&local.row)?;

        self.spawn_tail("create", guard, move |engine| async move {
            engine.push_insert(slot).await
        });
        Ok(local)
    }

    /// Replace the row with the key of `row` and confirm it in the background.
    ///
    /// A row that still has a temporary key is inserted remotely instead.
    pub async fn update(&self, row: Row) -> Result<LocalRow> {
        let guard = InFlightGuard::new(&self.inner);
        let key = self.key_of(&row)?;
        let local = self.inner.store.update_local(row, self.now()).await?;

        self.spawn_tail("update", guard, move |engine| async move {
            if key < 0 {
                engine.push_insert(key).await
            } else {
                engine.push_update(key).await
            }
        });
        Ok(local)
    }

    /// Hide the row at `key` immediately and remove it once the server
    /// confirms the delete
    pub async fn delete(&self, key: i64) -> Result<()> {
        let guard = InFlightGuard::new(&self.inner);
        let local = self.inner.store.soft_delete(key, self.now()).await?;

        if key < 0 {
            // Never reached the server
            self.inner.store.hard_delete(key).await?;
            return Ok(());
        }

        let row = self.remote_payload(&local.row);
        self.spawn_tail("delete", guard, move |engine| async move {
            engine.push_delete(key, &row).await
        });
        Ok(())
    }

    /// Track a confirmation task. A tail that fails, or that leaves the row
    /// modified, counts towards the next retry pass.
    fn spawn_tail<F, Fut>(&self, operation: &'static str, guard: InFlightGuard, tail: F)
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        let engine = self.clone();
        let future = tail(self.clone());
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _guard = guard;
            match future.await {
                Ok(true) => {}
                Ok(false) => {
                    engine.inner.failed.fetch_add(1, Ordering::SeqCst);
                }
                Err(error) => {
                    engine.inner.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(
                        table = engine.schema().name(),
                        operation,
                        "Remote confirmation failed, will retry: {error}"
                    );
                }
            }
        });
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send the row stored at temporary key `slot` to the server and adopt
    /// the server key.
    ///
    /// This and the other `push_` calls return whether the row ended up
    /// confirmed.
    async fn push_insert(&self, slot: i64) -> Result<bool> {
        let Some(local) = self.inner.store.get_raw(slot).await? else {
            return Ok(true);
        };
        let server = self
            .inner
            .remote
            .insert(&self.remote_payload(&local.row))
            .await?;
        self.confirm(slot, &server).await
    }

    async fn push_update(&self, key: i64) -> Result<bool> {
        let Some(local) = self.inner.store.get_raw(key).await? else {
            return Ok(true);
        };
        let server = self
            .inner
            .remote
            .update(&self.remote_payload(&local.row))
            .await?;
        self.confirm(key, &server).await
    }

    async fn push_delete(&self, key: i64, row: &Row) -> Result<bool> {
        match self.inner.remote.delete(row).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {
                tracing::debug!(table = self.schema().name(), key, "Already deleted remotely");
            }
            Err(error) => return Err(error.into()),
        }
        self.inner.store.hard_delete(key).await?;
        Ok(true)
    }

    /// Reconcile a server confirmation into the row known at `slot`.
    ///
    /// A confirmation never brings back a row removed or soft-deleted locally
    /// while the call was on the wire; an insert that raced a local delete is
    /// deleted remotely instead.
    async fn confirm(&self, slot: i64, server: &RemoteRow) -> Result<bool> {
        let key = self.key_of(&server.row)?;
        let stored = match self.inner.store.get_raw(slot).await? {
            Some(local) => Some(local),
            None if slot != key => self.inner.store.get_raw(key).await?,
            None => None,
        };
        if stored.as_ref().is_some_and(|local| local.meta.deleted) {
            // The pending delete owns the row now
            return Ok(true);
        }
        if stored.is_none() {
            tracing::debug!(
                table = self.schema().name(),
                slot,
                key,
                "Row removed locally before its confirmation arrived"
            );
            if slot < 0 {
                return self.push_delete(key, &server.row).await;
            }
            return Ok(true);
        }

        let reconciled = reconcile(&self.inner.store, slot, server, self.now()).await?;
        Ok(reconciled.outcome != Resolution::KeepLocal)
    }

    // Pull path

    /// Fetch matching rows from the server and reconcile each into local
    /// storage, returning the winners
    pub async fn pull(&self, filter: &Filter) -> Result<Vec<LocalRow>> {
        let rows = self.inner.remote.get(filter).await?;
        let mut winners = Vec::with_capacity(rows.len());
        for server in &rows {
            let key = self.key_of(&server.row)?;
            let Reconciled { row, .. } =
                reconcile(&self.inner.store, key, server, self.now()).await?;
            winners.push(row);
        }
        tracing::debug!(
            table = self.schema().name(),
            count = winners.len(),
            "Pulled rows"
        );
        Ok(winners)
    }

    /// Fetch one row from the server and reconcile it
    pub async fn refresh(&self, key: i64) -> Result<Option<LocalRow>> {
        let Some(server) = self.inner.remote.get_by_id(key).await? else {
            return Ok(None);
        };
        let reconciled = reconcile(&self.inner.store, key, &server, self.now()).await?;
        Ok(Some(reconciled.row))
    }

    /// Apply server tombstones newer than the checkpoint, then advance it.
    ///
    /// Returns whether any local row was removed.
    pub async fn pull_deletions(&self) -> Result<bool> {
        let checkpoint = self.inner.store.checkpoint().await?;
        let tombstones = self.inner.remote.get_deletions(checkpoint).await?;

        let mut newest = checkpoint;
        let mut removed = 0usize;
        for tombstone in &tombstones {
            if let Some(key) = tombstone.key(self.pk()) {
                if self.inner.store.hard_delete(key).await? {
                    removed += 1;
                }
            }
            newest = newest.max(tombstone.modified_date);
        }

        if newest > checkpoint {
            let stored = self.inner.store.advance_checkpoint(newest).await?;
            tracing::info!(
                table = self.schema().name(),
                removed,
                checkpoint = stored,
                "Applied remote deletions"
            );
        }
        Ok(removed > 0)
    }

    // Local reads

    /// Visible row at `key`
    pub async fn get(&self, key: i64) -> Result<Option<LocalRow>> {
        Ok(self
            .inner
            .store
            .get(key)
            .await?
            .filter(|row| !row.meta.deleted))
    }

    /// Visible rows matching `filter`
    pub async fn list(&self, filter: &Filter) -> Result<Vec<LocalRow>> {
        self.inner.store.select(&filter.clone().visible(), false).await
    }

    /// Visible rows matching `filter` that still have a temporary key
    pub async fn list_pending_inserts(&self, filter: &Filter) -> Result<Vec<LocalRow>> {
        self.inner.store.select(&filter.clone().visible(), true).await
    }

    /// Every row with unconfirmed local changes, soft-deleted ones included
    pub async fn pending_changes(&self) -> Result<Vec<LocalRow>> {
        self.inner.store.select(&Filter::new().modified(), false).await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        Ok(EngineStatus {
            failed: self.inner.failed.load(Ordering::SeqCst),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            pending: self.inner.store.count_modified().await?,
            checkpoint: self.inner.store.checkpoint().await?,
        })
    }

    // Task tracking

    /// Join every confirmation started so far, including ones started while
    /// waiting
    pub async fn wait_idle(&self) -> Result<()> {
        let mut panicked = None;
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks());
            if tasks.is_empty() {
                break;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(error) = result {
                    tracing::error!(table = self.schema().name(), "Confirmation task failed: {error}");
                    panicked.get_or_insert_with(|| error.to_string());
                }
            }
        }
        panicked.map_or(Ok(()), |message| Err(Error::Task(message)))
    }

    /// Run the retry loop in the background until [`SyncEngine::shutdown`]
    pub fn spawn_sync_loop(&self) {
        let mut slot = self
            .inner
            .sync_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let engine = self.clone();
        let cancel = self.inner.cancel.child_token();
        *slot = Some(tokio::spawn(async move {
            if let Err(error) = engine.run(cancel).await {
                tracing::error!(table = engine.schema().name(), "Sync loop stopped: {error}");
            }
        }));
    }

    /// Stop the retry loop and join every tracked task
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.cancel.cancel();
        let handle = self
            .inner
            .sync_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|error| Error::Task(error.to_string()))?;
        }
        self.wait_idle().await
    }
}
