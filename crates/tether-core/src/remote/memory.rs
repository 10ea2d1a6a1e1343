//! In-process authoritative store with the same contract as the REST server
//!
//! Used by the CLI's offline demo and by tests, which can take it offline,
//! make the next calls fail, or hold a `get` or an `insert` until released.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RemoteApi, RemoteError, RemoteResult};
use crate::filter::Filter;
use crate::models::{RemoteRow, Row};
use crate::clock::{Clock, MonotonicClock};
use crate::schema::TableSchema;

/// One request received by a [`MemoryRemote`]
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Get(Filter),
    GetById(i64),
    Insert(Row),
    Update(Row),
    Delete(i64),
    GetDeletions(i64),
}

#[derive(Debug, Clone)]
struct Record {
    row: Row,
    modified_date: i64,
    deleted: bool,
    local_id: Option<i64>,
}

impl Record {
    fn to_remote(&self) -> RemoteRow {
        RemoteRow::new(self.row.clone(), self.modified_date)
    }
}

#[derive(Debug)]
struct State {
    records: BTreeMap<i64, Record>,
    next_id: i64,
    offline: bool,
    failures: usize,
    calls: Vec<RemoteCall>,
    holds: Vec<(Filter, oneshot::Receiver<()>)>,
    insert_holds: Vec<oneshot::Receiver<()>>,
}

pub struct MemoryRemote {
    schema: Arc<TableSchema>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("table", &self.schema.name())
            .finish_non_exhaustive()
    }
}

impl MemoryRemote {
    /// Empty server for `schema`'s table; ids start at 1
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            clock: Arc::new(MonotonicClock::new()),
            state: Mutex::new(State {
                records: BTreeMap::new(),
                next_id: 1,
                offline: false,
                failures: 0,
                calls: Vec::new(),
                holds: Vec::new(),
                insert_holds: Vec::new(),
            }),
        }
    }

    /// Use `clock` for server `modifiedDate` values
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Key handed to the next inserted row
    pub fn set_next_id(&self, id: i64) {
        self.state().next_id = id;
    }

    /// While offline every call fails with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make the next `count` calls fail with `Unavailable`
    pub fn fail_next(&self, count: usize) {
        self.state().failures = count;
    }

    /// Hold the next `get` for exactly `filter` until the returned sender
    /// fires (or is dropped)
    pub fn hold_get(&self, filter: Filter) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        self.state().holds.push((filter, held));
        release
    }

    /// Hold the next `insert` after it is logged; holds queue in order
    pub fn hold_insert(&self) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        self.state().insert_holds.push(held);
        release
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Live rows, ordered by key
    pub fn rows(&self) -> Vec<RemoteRow> {
        self.state()
            .records
            .values()
            .filter(|record| !record.deleted)
            .map(Record::to_remote)
            .collect()
    }

    pub fn row(&self, id: i64) -> Option<RemoteRow> {
        self.state()
            .records
            .get(&id)
            .filter(|record| !record.deleted)
            .map(Record::to_remote)
    }

    /// Insert a row as another client would, bypassing fault injection
    pub fn server_insert(&self, row: Row) -> RemoteRow {
        let now = self.clock.now_millis();
        let mut state = self.state();
        self.create(&mut state, row, None, now)
    }

    /// Overlay `changes` onto a live row as another client would
    pub fn server_update(&self, id: i64, changes: &Row) -> Option<RemoteRow> {
        let now = self.clock.now_millis();
        let pk = self.schema.primary_key().to_string();
        let mut state = self.state();
        let record = state.records.get_mut(&id).filter(|record| !record.deleted)?;
        record.row.merge(changes);
        record.row.set_key(&pk, id);
        record.modified_date = now;
        Some(record.to_remote())
    }

    /// Tombstone a row as another client would
    pub fn server_delete(&self, id: i64) -> bool {
        let now = self.clock.now_millis();
        let mut state = self.state();
        Self::tombstone(&mut state, id, now)
    }

    fn create(&self, state: &mut State, mut row: Row, local_id: Option<i64>, now: i64) -> RemoteRow {
        let id = state.next_id;
        state.next_id += 1;
        row.set_key(self.schema.primary_key(), id);
        let record = Record {
            row,
            modified_date: now,
            deleted: false,
            local_id,
        };
        let remote = record.to_remote();
        state.records.insert(id, record);
        remote
    }

    fn tombstone(state: &mut State, id: i64, now: i64) -> bool {
        match state.records.get_mut(&id) {
            Some(record) if !record.deleted => {
                record.deleted = true;
                record.modified_date = now;
                true
            }
            _ => false,
        }
    }

    /// Log the call, then apply offline and injected failures
    fn admit(&self, call: RemoteCall) -> RemoteResult<()> {
        let mut state = self.state();
        state.calls.push(call);
        if state.offline {
            return Err(RemoteError::Unavailable("server is offline".to_string()));
        }
        if state.failures > 0 {
            state.failures -= 1;
            return Err(RemoteError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn not_found(&self, id: i64) -> RemoteError {
        RemoteError::Api {
            status: 404,
            message: format!("{} {id} not found", self.schema.name()),
        }
    }

    /// Domain columns of `row`, without the server-managed ones
    fn payload(&self, row: &Row) -> Row {
        row.iter()
            .filter(|(column, _)| {
                column.as_str() != self.schema.primary_key()
                    && column.as_str() != crate::models::MODIFIED_DATE
                    && !column.starts_with('_')
            })
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn get(&self, filter: &Filter) -> RemoteResult<Vec<RemoteRow>> {
        self.admit(RemoteCall::Get(filter.clone()))?;

        let held = {
            let mut state = self.state();
            let position = state.holds.iter().position(|(held, _)| held == filter);
            position.map(|position| state.holds.remove(position).1)
        };
        if let Some(held) = held {
            // A dropped sender releases the hold too
            held.await.ok();
        }

        let public = filter.without_private();
        let state = self.state();
        let mut rows = Vec::new();
        for record in state.records.values().filter(|record| !record.deleted) {
            let matched = public
                .matches(&record.row, &self.schema)
                .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
            if matched {
                rows.push(record.to_remote());
            }
        }
        Ok(rows)
    }

    async fn get_by_id(&self, id: i64) -> RemoteResult<Option<RemoteRow>> {
        self.admit(RemoteCall::GetById(id))?;
        Ok(self.row(id))
    }

    async fn insert(&self, row: &Row) -> RemoteResult<RemoteRow> {
        self.admit(RemoteCall::Insert(row.clone()))?;
        let held = {
            let mut state = self.state();
            (!state.insert_holds.is_empty()).then(|| state.insert_holds.remove(0))
        };
        if let Some(held) = held {
            held.await.ok();
        }
        let now = self.clock.now_millis();
        let local_id = row.key(self.schema.primary_key()).filter(|key| *key < 0);

        let mut state = self.state();
        if let Some(local_id) = local_id {
            let existing = state
                .records
                .values()
                .find(|record| record.local_id == Some(local_id));
            if let Some(existing) = existing {
                return Ok(existing.to_remote());
            }
        }
        Ok(self.create(&mut state, self.payload(row), local_id, now))
    }

    async fn update(&self, row: &Row) -> RemoteResult<RemoteRow> {
        self.admit(RemoteCall::Update(row.clone()))?;
        let pk = self.schema.primary_key();
        let id = row
            .key(pk)
            .ok_or_else(|| RemoteError::InvalidPayload(format!("row has no `{pk}`")))?;
        let now = self.clock.now_millis();
        let payload = self.payload(row);

        let mut state = self.state();
        let record = state
            .records
            .get_mut(&id)
            .filter(|record| !record.deleted)
            .ok_or_else(|| self.not_found(id))?;
        record.row = payload;
        record.row.set_key(pk, id);
        record.modified_date = now;
        Ok(record.to_remote())
    }

    async fn delete(&self, row: &Row) -> RemoteResult<()> {
        let pk = self.schema.primary_key();
        let id = row
            .key(pk)
            .ok_or_else(|| RemoteError::InvalidPayload(format!("row has no `{pk}`")))?;
        self.admit(RemoteCall::Delete(id))?;
        let now = self.clock.now_millis();
        if Self::tombstone(&mut self.state(), id, now) {
            Ok(())
        } else {
            Err(self.not_found(id))
        }
    }

    async fn get_deletions(&self, since: i64) -> RemoteResult<Vec<RemoteRow>> {
        self.admit(RemoteCall::GetDeletions(since))?;
        Ok(self
            .state()
            .records
            .values()
            .filter(|record| record.deleted && record.modified_date > since)
            .map(Record::to_remote)
            .collect())
    }
}
