use std::cell::RefCell;
use std::future::Future;
use std::path::PathBuf;
use std::rc::Rc;

use chrono::{TimeZone, Utc};
use derive_builder::Builder;
use tokio::task::{JoinHandle, LocalSet};
use uuid::Uuid;

use crate::collaborators::{
    AnalysisScript, AudioRecording, MemoryCatalog, ProgressAggregator, ResultImporter,
};
use crate::common::manager::info::ManagerType;
use crate::config::Config;
use crate::job::item::{AnalysisJobId, ItemId, ItemStatus, JobItem};
use crate::job::token::TokenSigner;
use crate::job::JobOrchestrator;
use crate::queue::{
    JobStatus, QueueClient, QueueError, QueueFuture, RemoteJobState, SubmitRequest,
};
use crate::resources::{Polynomial, ResourceSet, ResourceValue, ScalingProperty};
use crate::{Map, WrappedRcRefCell};

pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const DEFAULT_TEMPLATE: &str = "run {source} {config} {output_dir}";

pub async fn run_concurrent<
    R: 'static,
    Fut1: 'static + Future<Output = R>,
    Fut2: Future<Output = ()>,
>(
    background_fut: Fut1,
    fut: Fut2,
) -> (LocalSet, JoinHandle<R>) {
    let set = tokio::task::LocalSet::new();
    let handle = set.spawn_local(background_fut);
    set.run_until(fut).await;
    (set, handle)
}

/// Ten minute recording of one megabyte.
pub fn recording(id: u64) -> AudioRecording {
    AudioRecording {
        id: id.into(),
        uuid: Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0 + id as u128),
        recorded_date: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        duration_seconds: 600.0,
        data_length_bytes: 1_000_000,
        original_file_name: format!("{id}.wav"),
        latitude: Some(-27.5),
        longitude: Some(152.75),
    }
}

/// Script asking for two cores and two seconds of walltime per second of audio.
pub fn script(id: u64, template: &str) -> AnalysisScript {
    AnalysisScript {
        id: id.into(),
        name: format!("script-{id}"),
        command_template: template.to_string(),
        resources: ResourceSet {
            ncpus: Some(ResourceValue::Scalar(2)),
            walltime: Some(ResourceValue::Polynomial(Polynomial::new(
                vec![2.0, 0.0],
                ScalingProperty::Duration,
            ))),
            ..Default::default()
        },
        config: Some("a: 1\n".to_string()),
        config_file_name: None,
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.remote.root = PathBuf::from("/scratch");
    config.remote.api_url = "https://api.test".to_string();
    config.tokens.secret_key = Some(TEST_KEY.to_string());
    config.base_resources.walltime = Some(ResourceValue::Scalar(60));
    config
}

/// Item of job 5 running script 3 on recording 9 that was submitted as `queue_id`.
pub fn queued_item(id: u64, queue_id: &str) -> JobItem {
    let mut item = JobItem::new(id.into(), 5.into(), 3.into(), 9.into());
    item.status = ItemStatus::Queued;
    item.queue_id = Some(queue_id.to_string());
    item.queued_at = Some(Utc::now());
    item.attempts = 1;
    item
}

pub fn connection_error() -> QueueError {
    QueueError::Connection {
        command: "qsub".to_string(),
        message: "Connection refused".to_string(),
    }
}

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "build_status"))]
pub struct Status {
    #[builder(setter(into))]
    queue_id: String,
    #[builder(default = "RemoteJobState::Finished")]
    state: RemoteJobState,
    #[builder(default = "Some(0)")]
    exit_code: Option<i32>,
    #[builder(default)]
    walltime: Option<u64>,
    #[builder(default)]
    memory: Option<u64>,
    #[builder(default)]
    kill_reason: Option<String>,
}

impl StatusBuilder {
    pub fn finish(self) -> JobStatus {
        let Status {
            queue_id,
            state,
            exit_code,
            walltime,
            memory,
            kill_reason,
        } = self.build_status().unwrap();
        JobStatus {
            queue_id,
            state,
            exit_code,
            used_walltime_seconds: walltime,
            used_memory_bytes: memory,
            kill_reason,
            comment: None,
        }
    }
}

#[derive(Default)]
struct FakeQueueState {
    next_id: u64,
    calls: Vec<String>,
    submitted: Vec<SubmitRequest>,
    statuses: Map<String, JobStatus>,
    submit_error: Option<fn() -> QueueError>,
    cancel_error: Option<fn() -> QueueError>,
    status_error: Option<fn() -> QueueError>,
    on_submit: Option<Box<dyn FnOnce()>>,
}

/// Queue client that remembers every call. Submitted jobs get ids `77.srv`, `78.srv`, ...
/// and statuses are only known for jobs registered with [`FakeQueue::set_status`].
#[derive(Clone)]
pub struct FakeQueue {
    state: WrappedRcRefCell<FakeQueueState>,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self {
            state: WrappedRcRefCell::wrap(FakeQueueState {
                next_id: 77,
                ..Default::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.get().calls.clone()
    }

    pub fn submitted(&self) -> Vec<SubmitRequest> {
        self.state.get().submitted.clone()
    }

    pub fn set_status(&self, status: JobStatus) {
        self.state
            .get_mut()
            .statuses
            .insert(status.queue_id.clone(), status);
    }

    pub fn fail_submit(&self, error: fn() -> QueueError) {
        self.state.get_mut().submit_error = Some(error);
    }

    pub fn fail_cancel(&self, error: fn() -> QueueError) {
        self.state.get_mut().cancel_error = Some(error);
    }

    pub fn fail_status(&self, error: fn() -> QueueError) {
        self.state.get_mut().status_error = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.get_mut();
        state.submit_error = None;
        state.cancel_error = None;
        state.status_error = None;
    }

    /// Runs `callback` while the next submission is in progress.
    pub fn on_submit(&self, callback: impl FnOnce() + 'static) {
        self.state.get_mut().on_submit = Some(Box::new(callback));
    }
}

impl QueueClient for FakeQueue {
    fn manager(&self) -> ManagerType {
        ManagerType::Pbs
    }

    fn submit(&self, request: SubmitRequest) -> QueueFuture<String> {
        let state = self.state.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let callback = state.get_mut().on_submit.take();
            if let Some(callback) = callback {
                callback();
            }
            let mut state = state.get_mut();
            state.calls.push("submit".to_string());
            if let Some(error) = state.submit_error {
                return Err(error());
            }
            let queue_id = format!("{}.srv", state.next_id);
            state.next_id += 1;
            state.submitted.push(request);
            Ok(queue_id)
        })
    }

    fn cancel(&self, queue_id: &str) -> QueueFuture<()> {
        let state = self.state.clone();
        let queue_id = queue_id.to_string();
        Box::pin(async move {
            let mut state = state.get_mut();
            state.calls.push(format!("cancel {queue_id}"));
            match state.cancel_error {
                Some(error) => Err(error()),
                None => Ok(()),
            }
        })
    }

    fn fetch_status(&self, queue_id: &str) -> QueueFuture<JobStatus> {
        let state = self.state.clone();
        let queue_id = queue_id.to_string();
        Box::pin(async move {
            let mut state = state.get_mut();
            state.calls.push(format!("status {queue_id}"));
            if let Some(error) = state.status_error {
                return Err(error());
            }
            state
                .statuses
                .get(&queue_id)
                .cloned()
                .ok_or(QueueError::UnknownJob(queue_id))
        })
    }

    fn clear_history(&self, queue_id: &str) -> QueueFuture<()> {
        let state = self.state.clone();
        let queue_id = queue_id.to_string();
        Box::pin(async move {
            state.get_mut().calls.push(format!("clear {queue_id}"));
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    requests: RefCell<Vec<AnalysisJobId>>,
    updates: RefCell<usize>,
}

impl RecordingProgress {
    pub fn requests(&self) -> Vec<AnalysisJobId> {
        self.requests.borrow().clone()
    }

    pub fn updates(&self) -> usize {
        *self.updates.borrow()
    }
}

impl ProgressAggregator for RecordingProgress {
    fn request_update(&self, job: AnalysisJobId) {
        self.requests.borrow_mut().push(job);
    }

    fn update_pending(&self) {
        *self.updates.borrow_mut() += 1;
    }
}

#[derive(Default)]
pub struct RecordingImporter {
    imported: RefCell<Vec<ItemId>>,
}

impl RecordingImporter {
    pub fn imported(&self) -> Vec<ItemId> {
        self.imported.borrow().clone()
    }
}

impl ResultImporter for RecordingImporter {
    fn import_results(&self, item: &JobItem) {
        self.imported.borrow_mut().push(item.id);
    }
}

/// Orchestrator wired to a fake queue, a catalog with recording 9 and script 3 and
/// collaborators that record their triggers.
pub struct OrchestratorEnv {
    pub orchestrator: Rc<JobOrchestrator>,
    pub queue: FakeQueue,
    pub progress: Rc<RecordingProgress>,
    pub importer: Rc<RecordingImporter>,
}

impl OrchestratorEnv {
    pub fn new() -> Self {
        Self::with_template(DEFAULT_TEMPLATE)
    }

    pub fn with_template(template: &str) -> Self {
        let config = test_config();
        let queue = FakeQueue::new();
        let progress = Rc::new(RecordingProgress::default());
        let importer = Rc::new(RecordingImporter::default());
        let catalog = MemoryCatalog::new(vec![recording(9)], vec![script(3, template)]);
        let signer = TokenSigner::from_hex(config.tokens.secret_key.as_deref()).unwrap();
        let orchestrator = JobOrchestrator::new(
            Rc::new(queue.clone()),
            Rc::new(catalog),
            progress.clone(),
            importer.clone(),
            signer,
            config,
        );
        Self {
            orchestrator: Rc::new(orchestrator),
            queue,
            progress,
            importer,
        }
    }
}
