//! Background retry of unconfirmed local changes

use std::sync::atomic::Ordering;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::SyncEngine;
use crate::error::Result;
use crate::models::{LocalRow, RowState};

/// Outcome of one retry pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPass {
    /// No known failures
    Idle,
    /// A foreground operation is running; try again next tick
    Deferred,
    /// Every pending row was replayed
    Completed { confirmed: usize, failed: usize },
    /// Stopped early by cancellation or a new foreground operation
    Aborted { confirmed: usize, remaining: usize },
}

impl SyncEngine {
    /// Run one retry pass with the engine's own cancellation token
    pub async fn sync_once(&self) -> Result<SyncPass> {
        let cancel = self.inner.cancel.clone();
        self.retry_pass(&cancel).await
    }

    /// Count every unconfirmed row in storage as failed, then run one pass.
    ///
    /// For a fresh process, whose in-memory failure count starts at zero.
    pub async fn sync_pending(&self) -> Result<SyncPass> {
        self.seed_failed().await?;
        self.sync_once().await
    }

    /// Retry loop: replay unconfirmed rows every poll interval until `cancel`
    /// trips. A pass in progress is abandoned on cancellation.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let pending = self.seed_failed().await?;
        tracing::info!(
            table = self.schema().name(),
            pending,
            poll_interval = ?self.inner.config.poll_interval,
            "Sync loop started"
        );

        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                result = self.retry_pass(&cancel) => match result {
                    Ok(SyncPass::Idle | SyncPass::Deferred) => {}
                    Ok(pass) => tracing::debug!(table = self.schema().name(), ?pass, "Retry pass finished"),
                    Err(error) => tracing::error!(table = self.schema().name(), "Retry pass failed: {error}"),
                },
            }
        }

        tracing::info!(table = self.schema().name(), "Sync loop stopped");
        Ok(())
    }

    async fn retry_pass(&self, cancel: &CancellationToken) -> Result<SyncPass> {
        let observed = self.inner.failed.load(Ordering::SeqCst);
        if observed == 0 {
            return Ok(SyncPass::Idle);
        }
        if self.busy() {
            return Ok(SyncPass::Deferred);
        }

        let rows = self.inner.store.modified_rows().await?;
        // A user action may have started while reading
        if self.busy() {
            return Ok(SyncPass::Deferred);
        }
        self.rebase_failed(observed, rows.len());

        let total = rows.len();
        let mut confirmed = 0;
        let mut failed = 0;
        for (index, row) in rows.into_iter().enumerate() {
            if cancel.is_cancelled() || self.busy() {
                return Ok(SyncPass::Aborted {
                    confirmed,
                    remaining: total - index,
                });
            }

            match self.replay(row).await {
                Ok(true) => {
                    confirmed += 1;
                    self.decrement_failed();
                }
                Ok(false) => failed += 1,
                Err(error) => {
                    failed += 1;
                    tracing::warn!(table = self.schema().name(), "Retry failed: {error}");
                }
            }
        }
        Ok(SyncPass::Completed { confirmed, failed })
    }

    async fn seed_failed(&self) -> Result<usize> {
        let pending = self.inner.store.count_modified().await?;
        self.inner.failed.fetch_max(pending, Ordering::SeqCst);
        Ok(pending)
    }

    /// Replace the `observed` failure count with the `pending` rows found in
    /// storage, keeping increments from tails that failed in between
    pub(super) fn rebase_failed(&self, observed: usize, pending: usize) {
        self.inner
            .failed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(observed) + pending)
            })
            .ok();
    }

    fn busy(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) > 0
    }

    fn decrement_failed(&self) {
        self.inner
            .failed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            })
            .ok();
    }

    /// Replay the remote call matching the row's state.
    ///
    /// Returns whether the row is now confirmed.
    async fn replay(&self, local: LocalRow) -> Result<bool> {
        let key = self.key_of(&local.row)?;
        match local.state(self.pk()) {
            RowState::PendingDelete if key < 0 => {
                self.inner.store.hard_delete(key).await?;
                Ok(true)
            }
            RowState::PendingDelete => {
                self.push_delete(key, &self.remote_payload(&local.row))
                    .await
            }
            RowState::PendingCreate => self.push_insert(key).await,
            RowState::PendingUpdate => self.push_update(key).await,
            RowState::Clean => Ok(true),
        }
    }
}
