//! Systems that the orchestration core talks to but does not own: the catalog of scripts and
//! recordings, progress accounting of analysis jobs and the import of analysis results.
use std::cell::RefCell;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::item::{AnalysisJobId, ItemResult, ItemStatus, JobItem, RecordingId, ScriptId};
use crate::resources::ResourceSet;
use crate::store::JobItemStore;
use crate::{Map, Set, WrappedRcRefCell};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRecording {
    pub id: RecordingId,
    pub uuid: Uuid,
    pub recorded_date: DateTime<Utc>,
    pub duration_seconds: f64,
    pub data_length_bytes: u64,
    /// Name of the file stored in the `source` directory of an item.
    pub original_file_name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisScript {
    pub id: ScriptId,
    pub name: String,
    pub command_template: String,
    #[serde(default)]
    pub resources: ResourceSet,
    /// Contents of the configuration file passed to the script.
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub config_file_name: Option<String>,
}

impl AnalysisScript {
    pub fn config_file_name(&self) -> &str {
        self.config_file_name.as_deref().unwrap_or("config.yml")
    }
}

pub trait AnalysisCatalog {
    fn recording(&self, id: RecordingId) -> Option<AudioRecording>;
    fn script(&self, id: ScriptId) -> Option<AnalysisScript>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub recordings: Vec<AudioRecording>,
    #[serde(default)]
    pub scripts: Vec<AnalysisScript>,
}

/// Catalog that keeps everything in memory, loaded from a JSON file.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    recordings: Map<RecordingId, AudioRecording>,
    scripts: Map<ScriptId, AnalysisScript>,
}

impl MemoryCatalog {
    pub fn new(recordings: Vec<AudioRecording>, scripts: Vec<AnalysisScript>) -> Self {
        Self {
            recordings: recordings.into_iter().map(|r| (r.id, r)).collect(),
            scripts: scripts.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read catalog {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&data)
            .with_context(|| format!("Invalid catalog {}", path.display()))?;
        log::debug!(
            "Loaded {} recording(s) and {} script(s) from {}",
            file.recordings.len(),
            file.scripts.len(),
            path.display()
        );
        Ok(Self::new(file.recordings, file.scripts))
    }
}

impl AnalysisCatalog for MemoryCatalog {
    fn recording(&self, id: RecordingId) -> Option<AudioRecording> {
        self.recordings.get(&id).cloned()
    }

    fn script(&self, id: ScriptId) -> Option<AnalysisScript> {
        self.scripts.get(&id).cloned()
    }
}

/// Keeps per job counters up to date.
///
/// Triggers may arrive concurrently and for the same job many times; an implementation only
/// has to guarantee that the counters are eventually computed from the latest item states.
pub trait ProgressAggregator {
    fn request_update(&self, job: AnalysisJobId);

    /// Computes the requested updates. Called after the triggering items were stored.
    fn update_pending(&self) {}
}

/// Takes over the outputs of a successfully finished item.
pub trait ResultImporter {
    fn import_results(&self, item: &JobItem);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub new: u32,
    pub queued: u32,
    pub working: u32,
    pub successful: u32,
    pub failed: u32,
    pub killed: u32,
    pub cancelled: u32,
}

impl JobProgress {
    pub fn add(&mut self, item: &JobItem) {
        match (item.status, item.result) {
            (ItemStatus::New, _) => self.new += 1,
            (ItemStatus::Queued, _) => self.queued += 1,
            (ItemStatus::Working, _) => self.working += 1,
            (ItemStatus::Finished, Some(ItemResult::Success)) => self.successful += 1,
            (ItemStatus::Finished, Some(ItemResult::Killed)) => self.killed += 1,
            (ItemStatus::Finished, Some(ItemResult::Cancelled)) => self.cancelled += 1,
            (ItemStatus::Finished, Some(ItemResult::Failed) | None) => self.failed += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.new
            + self.queued
            + self.working
            + self.successful
            + self.failed
            + self.killed
            + self.cancelled
    }
}

/// Recomputes job progress from the item store.
pub struct StoreProgressAggregator<S> {
    store: WrappedRcRefCell<S>,
    pending: RefCell<Set<AnalysisJobId>>,
    progress: RefCell<Map<AnalysisJobId, JobProgress>>,
}

impl<S: JobItemStore> StoreProgressAggregator<S> {
    pub fn new(store: WrappedRcRefCell<S>) -> Self {
        Self {
            store,
            pending: Default::default(),
            progress: Default::default(),
        }
    }

    pub fn progress(&self, job: AnalysisJobId) -> Option<JobProgress> {
        self.progress.borrow().get(&job).copied()
    }
}

impl<S: JobItemStore> ProgressAggregator for StoreProgressAggregator<S> {
    fn request_update(&self, job: AnalysisJobId) {
        self.pending.borrow_mut().insert(job);
    }

    fn update_pending(&self) {
        let pending: Vec<AnalysisJobId> = self.pending.borrow_mut().drain().collect();
        if pending.is_empty() {
            return;
        }
        let store = self.store.get();
        let mut progress = self.progress.borrow_mut();
        for job in pending {
            let mut counters = JobProgress::default();
            for item in store.items_of_job(job) {
                counters.add(&item);
            }
            log::info!(
                "Analysis job {job}: {} new, {} queued, {} working, {} successful, {} failed, {} killed, {} cancelled",
                counters.new,
                counters.queued,
                counters.working,
                counters.successful,
                counters.failed,
                counters.killed,
                counters.cancelled
            );
            progress.insert(job, counters);
        }
    }
}

/// Announces finished items whose results are waiting in their output directory.
#[derive(Default)]
pub struct LoggingResultImporter;

impl ResultImporter for LoggingResultImporter {
    fn import_results(&self, item: &JobItem) {
        log::info!(
            "Results of item {} (job {}, recording {}) are ready for import",
            item.id,
            item.analysis_job_id,
            item.audio_recording_id
        );
    }
}
