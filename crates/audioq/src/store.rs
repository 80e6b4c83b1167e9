//! Persistence of job items and the fast half of the transition marker protocol.
//!
//! Administrative actions only write markers ([`JobItemStore::mark_transitions`]). Workers
//! claim one marked item at a time, perform the slow transition on a copy of the item and
//! store the copy back with [`JobItemStore::complete`].
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::common::utils::time::now_monotonic;
use crate::job::item::{AnalysisJobId, ItemId, ItemStatus, JobItem, Transition};
use crate::job::machine::can_mark;

/// A marked item handed over to a single worker.
#[derive(Debug, Clone)]
pub struct Claim {
    pub item: JobItem,
    pub transition: Transition,
}

pub trait JobItemStore {
    fn insert(&mut self, item: JobItem);

    fn get(&self, id: ItemId) -> Option<JobItem>;

    fn items(&self) -> Vec<JobItem>;

    fn items_of_job(&self, job: AnalysisJobId) -> Vec<JobItem>;

    /// Marks the selected items (all items if `ids` is `None`) with `transition`.
    /// Items whose status does not allow the transition are skipped, and so are items with a
    /// pending cancellation unless `transition` is a cancellation too.
    /// Returns the number of marked items.
    fn mark_transitions(&mut self, ids: Option<&[ItemId]>, transition: Transition) -> usize;

    /// Reserves the first marked item that is not leased by another worker.
    ///
    /// Queue and retry markers are skipped while `max_in_flight` items are tracked remotely.
    fn claim(
        &mut self,
        now: Instant,
        lease: Duration,
        max_in_flight: Option<usize>,
    ) -> Option<Claim>;

    /// Reserves an item without a marker that is tracked remotely, for reconciliation.
    fn claim_for_reconcile(&mut self, id: ItemId, now: Instant, lease: Duration)
    -> Option<JobItem>;

    /// Returns ids of unmarked remotely tracked items that are not leased.
    fn reconcile_candidates(&self, now: Instant) -> Vec<ItemId>;

    /// Stores an item after a transition and releases its lease.
    ///
    /// The stored marker is cleared only if it is still `processed`; a marker written while
    /// the transition was running is kept.
    fn complete(&mut self, item: JobItem, processed: Option<Transition>);

    /// Gives up on a claimed item. The marker is kept if `keep_marker` is set, otherwise it is
    /// cleared under the same condition as in [`JobItemStore::complete`].
    /// The lease is kept, so that the item is not claimed again before it expires.
    fn abandon(&mut self, id: ItemId, processed: Option<Transition>, keep_marker: bool);

    /// Number of items that are tracked remotely or are being submitted.
    fn in_flight_count(&self) -> usize;

    fn has_markers(&self) -> bool;
}

#[derive(Debug, Clone)]
struct StoredItem {
    item: JobItem,
    lease_until: Option<Instant>,
}

impl StoredItem {
    fn is_leased(&self, now: Instant) -> bool {
        self.lease_until.is_some_and(|until| until > now)
    }

    fn is_submitting(&self, now: Instant) -> bool {
        self.is_leased(now)
            && matches!(
                self.item.transition,
                Some(Transition::Queue | Transition::Retry)
            )
            && !self.item.status.is_in_flight()
    }
}

/// Item store kept in memory, optionally loaded from and saved into a JSON file.
///
/// A store created with [`MemoryItemStore::open`] writes the file back after every
/// completed or abandoned claim.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: BTreeMap<ItemId, StoredItem>,
    backing_file: Option<PathBuf>,
}

impl MemoryItemStore {
    pub fn new(items: Vec<JobItem>) -> Self {
        let mut store = Self::default();
        for item in items {
            store.insert(item);
        }
        store
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read items from {}", path.display()))?;
        let items: Vec<JobItem> = serde_json::from_str(&data)
            .with_context(|| format!("Invalid item file {}", path.display()))?;
        for item in &items {
            if let Err(error) = item.validate() {
                log::warn!("Inconsistent item loaded from {}: {error}", path.display());
            }
        }
        Ok(Self::new(items))
    }

    /// Loads the items of `path` and keeps the file in sync with the store.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut store = Self::load(path)?;
        store.backing_file = Some(path.to_path_buf());
        Ok(store)
    }

    /// Writes all items into `path`. The file is replaced at once, a reader never sees a
    /// partially written file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(&self.items())?;
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        std::fs::write(&tmp_path, data)
            .with_context(|| format!("Cannot write items into {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Cannot write items into {}", path.display()))
    }

    /// Writes the items into the file the store was opened from, if any.
    pub fn flush(&self) -> anyhow::Result<()> {
        match &self.backing_file {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }

    fn flush_or_log(&self) {
        if let Err(error) = self.flush() {
            log::error!("Cannot persist job items: {error:?}");
        }
    }

    fn clear_marker(stored: &mut StoredItem, processed: Option<Transition>) {
        if stored.item.transition == processed {
            stored.item.transition = None;
        } else if let Some(marker) = stored.item.transition {
            log::debug!(
                "Item {} was marked with {marker} in the meantime, keeping the marker",
                stored.item.id
            );
        }
    }
}

impl JobItemStore for MemoryItemStore {
    fn insert(&mut self, item: JobItem) {
        self.items.insert(
            item.id,
            StoredItem {
                item,
                lease_until: None,
            },
        );
    }

    fn get(&self, id: ItemId) -> Option<JobItem> {
        self.items.get(&id).map(|stored| stored.item.clone())
    }

    fn items(&self) -> Vec<JobItem> {
        self.items.values().map(|stored| stored.item.clone()).collect()
    }

    fn items_of_job(&self, job: AnalysisJobId) -> Vec<JobItem> {
        self.items
            .values()
            .filter(|stored| stored.item.analysis_job_id == job)
            .map(|stored| stored.item.clone())
            .collect()
    }

    fn mark_transitions(&mut self, ids: Option<&[ItemId]>, transition: Transition) -> usize {
        let mut count = 0;
        let mut mark = |stored: &mut StoredItem| {
            if can_mark(&stored.item, transition) {
                stored.item.transition = Some(transition);
                count += 1;
            } else {
                log::debug!(
                    "Item {} in state {:?} with marker {:?} cannot be marked with {transition}",
                    stored.item.id,
                    stored.item.status,
                    stored.item.transition
                );
            }
        };
        match ids {
            Some(ids) => {
                for id in ids {
                    match self.items.get_mut(id) {
                        Some(stored) => mark(stored),
                        None => log::warn!("Item {id} does not exist"),
                    }
                }
            }
            None => self.items.values_mut().for_each(&mut mark),
        }
        count
    }

    fn claim(
        &mut self,
        now: Instant,
        lease: Duration,
        max_in_flight: Option<usize>,
    ) -> Option<Claim> {
        let in_flight = self.in_flight_count_at(now);
        let at_capacity = max_in_flight.is_some_and(|max| in_flight >= max);

        for stored in self.items.values_mut() {
            let Some(transition) = stored.item.transition else {
                continue;
            };
            if stored.is_leased(now) {
                continue;
            }
            let submits = matches!(transition, Transition::Queue | Transition::Retry);
            if submits && at_capacity {
                continue;
            }
            stored.lease_until = Some(now + lease);
            return Some(Claim {
                item: stored.item.clone(),
                transition,
            });
        }
        None
    }

    fn claim_for_reconcile(
        &mut self,
        id: ItemId,
        now: Instant,
        lease: Duration,
    ) -> Option<JobItem> {
        let stored = self.items.get_mut(&id)?;
        if stored.is_leased(now)
            || stored.item.transition.is_some()
            || !stored.item.status.is_in_flight()
        {
            return None;
        }
        stored.lease_until = Some(now + lease);
        Some(stored.item.clone())
    }

    fn reconcile_candidates(&self, now: Instant) -> Vec<ItemId> {
        self.items
            .values()
            .filter(|stored| {
                stored.item.status.is_in_flight()
                    && stored.item.transition.is_none()
                    && !stored.is_leased(now)
            })
            .map(|stored| stored.item.id)
            .collect()
    }

    fn complete(&mut self, mut item: JobItem, processed: Option<Transition>) {
        match self.items.get_mut(&item.id) {
            Some(stored) => {
                item.transition = stored.item.transition;
                stored.item = item;
                Self::clear_marker(stored, processed);
                stored.lease_until = None;
            }
            None => log::error!("Item {} disappeared from the store", item.id),
        }
        self.flush_or_log();
    }

    fn abandon(&mut self, id: ItemId, processed: Option<Transition>, keep_marker: bool) {
        if let Some(stored) = self.items.get_mut(&id) {
            if !keep_marker {
                Self::clear_marker(stored, processed);
                stored.lease_until = None;
            }
        }
        self.flush_or_log();
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight_count_at(now_monotonic())
    }

    fn has_markers(&self) -> bool {
        self.items
            .values()
            .any(|stored| stored.item.transition.is_some())
    }
}

impl MemoryItemStore {
    fn in_flight_count_at(&self, now: Instant) -> usize {
        self.items
            .values()
            .filter(|stored| stored.item.status.is_in_flight() || stored.is_submitting(now))
            .count()
    }
}
