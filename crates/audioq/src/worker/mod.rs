//! Slow half of the transition marker protocol.
//!
//! A pool of cooperative workers claims marked items from the store, one item per worker,
//! and drives them through the orchestrator. A separate reconciliation pass polls the remote
//! queue for items that are tracked remotely but have no marker.
pub mod service;

use std::cell::Cell;
use std::rc::Rc;

use serde::Serialize;
use tokio::sync::Notify;

use crate::collaborators::ProgressAggregator;
use crate::common::utils::time::now_monotonic;
use crate::config::WorkerConfig;
use crate::job::item::{ItemStatus, JobItem};
use crate::job::{JobOrchestrator, OrchestratorError};
use crate::store::{Claim, JobItemStore};
use crate::WrappedRcRefCell;

/// What happened to a single claimed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transition was performed and its marker cleared.
    Completed,
    /// A transient failure; the marker stays and the item is retried once its lease expires.
    Postponed,
    /// A definitive failure; the marker was dropped.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub completed: usize,
    pub postponed: usize,
    pub failed: usize,
}

impl PoolSummary {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Postponed => self.postponed += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

pub struct WorkerPool<S> {
    store: WrappedRcRefCell<S>,
    orchestrator: Rc<JobOrchestrator>,
    progress: Rc<dyn ProgressAggregator>,
    config: WorkerConfig,
}

impl<S: JobItemStore> WorkerPool<S> {
    pub fn new(
        store: WrappedRcRefCell<S>,
        orchestrator: Rc<JobOrchestrator>,
        progress: Rc<dyn ProgressAggregator>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            progress,
            config,
        }
    }

    pub fn store(&self) -> &WrappedRcRefCell<S> {
        &self.store
    }

    fn claim(&self) -> Option<Claim> {
        self.store.get_mut().claim(
            now_monotonic(),
            self.config.lease,
            self.config.max_in_flight,
        )
    }

    /// Performs the transition of a claimed item and stores the result.
    pub async fn process(&self, claim: Claim) -> Outcome {
        let Claim {
            mut item,
            transition,
        } = claim;
        let id = item.id;
        log::debug!("Processing {transition} of item {id}");

        match self.orchestrator.apply(&mut item, transition).await {
            Ok(()) => {
                self.store.get_mut().complete(item, Some(transition));
                self.progress.update_pending();
                Outcome::Completed
            }
            Err(error) if error.is_retryable() => {
                log::warn!("Cannot {transition} item {id}, it will be retried later: {error}");
                self.store.get_mut().abandon(id, Some(transition), true);
                Outcome::Postponed
            }
            Err(error) => {
                log::error!("Cannot {transition} item {id}: {error}");
                self.store.get_mut().abandon(id, Some(transition), false);
                Outcome::Failed
            }
        }
    }

    async fn drain(&self, index: usize, summary: &Cell<PoolSummary>) {
        while let Some(claim) = self.claim() {
            let outcome = self.process(claim).await;
            let mut current = summary.get();
            current.add(outcome);
            summary.set(current);
        }
        log::trace!("Worker {index} has nothing to do");
    }

    /// Runs `pool_size` workers until no marked item can be claimed.
    ///
    /// Markers of postponed items and markers deferred by the in-flight limit are left in the
    /// store.
    pub async fn run_until_idle(&self) -> PoolSummary {
        let summary = Cell::new(PoolSummary::default());
        let workers = (0..self.config.pool_size.max(1)).map(|index| self.drain(index, &summary));
        futures::future::join_all(workers).await;
        summary.get()
    }

    /// Worker of a long running pool. It sleeps while there is nothing to claim and wakes
    /// up after `poll_interval` or when notified.
    pub(crate) async fn worker_loop(&self, index: usize, wakeup: &Notify, stop: &Cell<bool>) {
        log::debug!("Worker {index} started");
        while !stop.get() {
            match self.claim() {
                Some(claim) => {
                    self.process(claim).await;
                }
                None => {
                    tokio::select! {
                        _ = wakeup.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
        log::debug!("Worker {index} stopped");
    }

    /// Polls the remote status of every unmarked item that is queued or working.
    /// Returns the number of items whose state has changed.
    pub async fn reconcile(&self) -> usize {
        let candidates = self.store.get().reconcile_candidates(now_monotonic());
        if candidates.is_empty() {
            return 0;
        }
        log::debug!("Reconciling {} item(s)", candidates.len());

        let mut changed = 0;
        for id in candidates {
            let Some(mut item) =
                self.store
                    .get_mut()
                    .claim_for_reconcile(id, now_monotonic(), self.config.lease)
            else {
                continue;
            };
            match self.reconcile_item(&mut item).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(error) => log::warn!("Cannot reconcile item {id}: {error}"),
            }
            self.store.get_mut().complete(item, None);
        }
        if changed > 0 {
            self.progress.update_pending();
        }
        changed
    }

    async fn reconcile_item(&self, item: &mut JobItem) -> Result<bool, OrchestratorError> {
        let Some(queue_id) = item.queue_id.clone() else {
            return Ok(false);
        };
        match self
            .orchestrator
            .queue_client()
            .fetch_status(&queue_id)
            .await
        {
            Ok(status) if status.is_terminal() => {
                self.orchestrator.finish(item, Some(status)).await?;
                Ok(true)
            }
            Ok(status) if status.state.has_started() && item.status == ItemStatus::Queued => {
                self.orchestrator.work(item)?;
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(error) if error.is_unknown_job() => {
                self.orchestrator.finish(item, None).await?;
                Ok(true)
            }
            Err(error) => Err(error.into()),
        }
    }
}
