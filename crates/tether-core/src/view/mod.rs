//! Data-bound view over one engine
//!
//! Each load races a server fetch against a local read: the local read
//! paints first when it can, the reconciled server result replaces it. Every
//! load bumps a generation and results from older generations are dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::engine::SyncEngine;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::models::LocalRow;

/// Options for a [`DataView`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    /// Pull server tombstones on every load
    pub sync_deletions: bool,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            sync_deletions: true,
        }
    }
}

/// What presentation code renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub items: Vec<LocalRow>,
    pub loading: bool,
    pub error_message: Option<String>,
    /// Load that produced this state
    pub generation: u64,
}

struct Shared {
    engine: SyncEngine,
    options: ViewOptions,
    filter: Mutex<Filter>,
    generation: AtomicU64,
    state: watch::Sender<ViewState>,
    tasks: Mutex<JoinSet<()>>,
}

/// One load generation, as captured by its background paths
#[derive(Clone)]
struct Load {
    shared: Arc<Shared>,
    generation: u64,
    filter: Filter,
    server_done: Arc<AtomicBool>,
}

impl Load {
    fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == self.generation
    }

    /// Apply `update` unless a newer load has started
    fn publish(&self, update: impl FnOnce(&mut ViewState) -> bool) -> bool {
        self.shared.state.send_if_modified(|state| {
            if !self.is_current() {
                return false;
            }
            update(state)
        })
    }

    async fn remote(self) {
        match self.fetch_remote().await {
            Ok(items) => {
                let published = self.publish(|state| {
                    self.server_done.store(true, Ordering::SeqCst);
                    state.items = items;
                    state.loading = false;
                    true
                });
                if !published {
                    tracing::debug!(generation = self.generation, "Discarded superseded server result");
                }
            }
            Err(error) => {
                tracing::warn!(generation = self.generation, "Server fetch failed: {error}");
                self.publish(|state| {
                    state.error_message = Some(error.to_string());
                    true
                });
            }
        }
    }

    async fn fetch_remote(&self) -> Result<Vec<LocalRow>> {
        let engine = &self.shared.engine;
        let winners = engine.pull(&self.filter).await?;
        let mut items = engine.list_pending_inserts(&self.filter).await?;
        items.extend(winners.into_iter().filter(|row| !row.meta.deleted));
        Ok(items)
    }

    async fn local(self) {
        match self.shared.engine.list(&self.filter).await {
            Ok(items) => {
                self.publish(|state| {
                    if self.server_done.load(Ordering::SeqCst) {
                        return false;
                    }
                    state.items = items;
                    state.loading = false;
                    true
                });
            }
            Err(error) => {
                self.publish(|state| {
                    state.error_message = Some(error.to_string());
                    state.loading = false;
                    true
                });
            }
        }
    }

    async fn deletions(self) {
        match self.shared.engine.pull_deletions().await {
            Ok(true) if self.is_current() && !self.server_done.load(Ordering::SeqCst) => {
                self.local().await;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(generation = self.generation, "Deletion pull failed: {error}");
            }
        }
    }
}

/// Live, filterable list of rows backed by a [`SyncEngine`]
#[derive(Clone)]
pub struct DataView {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DataView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataView")
            .field("table", &self.shared.engine.schema().name())
            .field("generation", &self.shared.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DataView {
    pub fn new(engine: SyncEngine, options: ViewOptions) -> Self {
        let (state, _) = watch::channel(ViewState {
            loading: true,
            ..ViewState::default()
        });
        Self {
            shared: Arc::new(Shared {
                engine,
                options,
                filter: Mutex::new(Filter::new()),
                generation: AtomicU64::new(0),
                state,
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Start loading `filter`, superseding any load in progress.
    ///
    /// Returns the new generation.
    pub fn load(&self, filter: Filter) -> u64 {
        *self
            .shared
            .filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = filter.clone();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state.send_replace(ViewState {
            items: Vec::new(),
            loading: true,
            error_message: None,
            generation,
        });

        let load = Load {
            shared: Arc::clone(&self.shared),
            generation,
            filter,
            server_done: Arc::new(AtomicBool::new(false)),
        };
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(load.clone().remote());
        tasks.spawn(load.clone().local());
        if self.shared.options.sync_deletions {
            tasks.spawn(load.deletions());
        }
        generation
    }

    /// Load the current filter again
    pub fn reload(&self) -> u64 {
        let filter = self
            .shared
            .filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.load(filter)
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> ViewState {
        self.shared.state.borrow().clone()
    }

    pub fn filter(&self) -> Filter {
        self.shared
            .filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until the latest load has painted something
    pub async fn wait_loaded(&self) -> ViewState {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let mut receiver = self.subscribe();
        let result = receiver
            .wait_for(|state| state.generation >= generation && !state.loading)
            .await
            .map(|state| state.clone());
        result.unwrap_or_else(|_| self.state())
    }

    /// Join every path of every load started so far
    pub async fn wait_idle(&self) -> Result<()> {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks());
            if tasks.is_empty() {
                return Ok(());
            }
            while let Some(result) = tasks.join_next().await {
                result.map_err(|error| Error::Task(error.to_string()))?;
            }
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::Row;
    use crate::remote::MemoryRemote;
    use crate::schema::{ColumnType, TableSchema};
    use crate::store::LocalStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Fixture {
        engine: SyncEngine,
        remote: Arc<MemoryRemote>,
        server_clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let schema = Arc::new(
            TableSchema::builder("todo", "id")
                .column("id", ColumnType::Integer)
                .nullable_column("title", ColumnType::Text)
                .build()
                .unwrap(),
        );
        let server_clock = Arc::new(ManualClock::new(1_000));
        let remote = Arc::new(MemoryRemote::new(schema.clone()).with_clock(server_clock.clone()));
        let engine = SyncEngine::builder(schema, remote.clone())
            .clock(Arc::new(ManualClock::new(500)))
            .open(LocalStore::open_in_memory().await.unwrap())
            .await
            .unwrap();
        Fixture {
            engine,
            remote,
            server_clock,
        }
    }

    fn titles(state: &ViewState) -> Vec<String> {
        state
            .items
            .iter()
            .filter_map(|row| row.row.get_str("title").map(str::to_string))
            .collect()
    }

    async fn wait_for(view: &DataView, check: impl Fn(&ViewState) -> bool) -> ViewState {
        let mut receiver = view.subscribe();
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            receiver.wait_for(|state| check(state)),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        state
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_paints_before_server_answers() {
        let f = fixture().await;
        let id = f.remote.server_insert(Row::new().with("title", "v1")).key("id").unwrap();
        f.engine.pull(&Filter::new()).await.unwrap();
        f.server_clock.set(2_000);
        f.remote.server_update(id, &Row::new().with("title", "v2"));

        let view = DataView::new(f.engine.clone(), ViewOptions::default());
        let release = f.remote.hold_get(Filter::new());
        view.load(Filter::new());

        let painted = view.wait_loaded().await;
        assert_eq!(titles(&painted), vec!["v1"]);

        release.send(()).unwrap();
        view.wait_idle().await.unwrap();
        let state = view.state();
        assert_eq!(titles(&state), vec!["v2"]);
        assert!(!state.loading);
        assert_eq!(state.error_message, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_newer_load_supersedes_older_one() {
        let f = fixture().await;
        f.remote.server_insert(Row::new().with("title", "alpha"));
        f.remote.server_insert(Row::new().with("title", "beta"));

        let filter_a = Filter::new().with("title", "alpha");
        let filter_b = Filter::new().with("title", "beta");
        let release_a = f.remote.hold_get(filter_a.clone());
        let release_b = f.remote.hold_get(filter_b.clone());

        let view = DataView::new(f.engine.clone(), ViewOptions::default());
        view.load(filter_a);
        let generation = view.load(filter_b);
        assert_eq!(generation, 2);

        release_b.send(()).unwrap();
        let state = wait_for(&view, |state| titles(state) == vec!["beta"]).await;
        assert_eq!(state.generation, 2);

        // The first load's server answer arrives last and is dropped
        release_a.send(()).unwrap();
        view.wait_idle().await.unwrap();
        let state = view.state();
        assert_eq!(titles(&state), vec!["beta"]);
        assert_eq!(state.generation, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_inserts_lead_server_rows() {
        let f = fixture().await;
        f.remote.set_offline(true);
        f.engine.create(Row::new().with("title", "milk draft")).await.unwrap();
        f.engine.wait_idle().await.unwrap();
        f.remote.set_offline(false);
        f.remote.server_insert(Row::new().with("title", "milk run"));
        f.remote.server_insert(Row::new().with("title", "bread"));

        let view = DataView::new(f.engine.clone(), ViewOptions::default());
        view.load(Filter::new().with("title", "milk"));
        view.wait_idle().await.unwrap();

        let state = view.state();
        assert_eq!(titles(&state), vec!["milk draft", "milk run"]);
        assert!(state.items[0].key("id").unwrap() < 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_failure_sets_error_and_keeps_local_rows() {
        let f = fixture().await;
        f.remote.server_insert(Row::new().with("title", "cached"));
        f.engine.pull(&Filter::new()).await.unwrap();
        f.remote.set_offline(true);

        let view = DataView::new(f.engine.clone(), ViewOptions::default());
        view.load(Filter::new());
        view.wait_idle().await.unwrap();

        let state = view.state();
        assert_eq!(titles(&state), vec!["cached"]);
        assert!(!state.loading);
        assert!(state.error_message.is_some());

        // A reload clears the error once the server is back
        f.remote.set_offline(false);
        view.reload();
        view.wait_idle().await.unwrap();
        assert_eq!(view.state().error_message, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deletions_repaint_local_rows() {
        let f = fixture().await;
        f.remote.server_insert(Row::new().with("title", "keep"));
        let gone = f.remote.server_insert(Row::new().with("title", "gone")).key("id").unwrap();
        f.engine.pull(&Filter::new()).await.unwrap();
        f.server_clock.set(1_500);
        f.remote.server_delete(gone);

        let view = DataView::new(f.engine.clone(), ViewOptions::default());
        let release = f.remote.hold_get(Filter::new());
        view.load(Filter::new());

        let state = wait_for(&view, |state| !state.loading && titles(state) == vec!["keep"]).await;
        assert_eq!(state.generation, 1);

        release.send(()).unwrap();
        view.wait_idle().await.unwrap();
        assert_eq!(titles(&view.state()), vec!["keep"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deletion_sync_can_be_disabled() {
        let f = fixture().await;
        let view = DataView::new(
            f.engine.clone(),
            ViewOptions {
                sync_deletions: false,
            },
        );
        view.load(Filter::new());
        view.wait_idle().await.unwrap();
        assert!(!f
            .remote
            .calls()
            .iter()
            .any(|call| matches!(call, crate::remote::RemoteCall::GetDeletions(_))));
    }
}
