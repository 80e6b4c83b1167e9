//! Slow half of the item state machine: transitions that talk to the remote queue.
//!
//! Every transition first consults [`plan`], so an illegal event fails before any remote call.
//! The orchestrator only mutates the item it is given; persisting it is up to the caller.
use std::rc::Rc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::collaborators::{AnalysisCatalog, ProgressAggregator, ResultImporter};
use crate::common::error::ValidationError;
use crate::common::placeholders::format_command;
use crate::config::Config;
use crate::job::context::{CommandContext, ItemLayout};
use crate::job::item::{ItemResult, ItemStatus, JobItem, Transition};
use crate::job::machine::{Event, MachineError, plan};
use crate::job::script::{
    DOWNLOAD_TOKEN_ENV, HOOK_TOKEN_ENV, build_payload, item_url, source_url, status_hooks,
};
use crate::job::token::{ITEM_STATUS_SCOPE, MEDIA_ORIGINAL_SCOPE, TokenSigner};
use crate::queue::{
    Disposition, JobStatus, QueueClient, QueueError, RemoteJobState, SubmitRequest,
};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Transition(#[from] MachineError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Job `{queue_id}` has not finished yet, it is {state:?}")]
    RemoteNotFinished {
        queue_id: String,
        state: RemoteJobState,
    },
    #[error("{0}")]
    MissingData(String),
    #[error("Cannot issue token: {0}")]
    Token(String),
}

impl OrchestratorError {
    /// The same transition may succeed if it is attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Queue(error) => error.is_transient(),
            OrchestratorError::RemoteNotFinished { .. } => true,
            OrchestratorError::Transition(_)
            | OrchestratorError::Validation(_)
            | OrchestratorError::MissingData(_)
            | OrchestratorError::Token(_) => false,
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

pub fn job_name(item: &JobItem) -> String {
    format!(
        "audioq:{}:{}:{}",
        item.analysis_job_id, item.id, item.script_id
    )
}

fn clear_marker(item: &mut JobItem, transition: Transition) {
    if item.transition == Some(transition) {
        item.transition = None;
    }
}

pub struct JobOrchestrator {
    queue: Rc<dyn QueueClient>,
    catalog: Rc<dyn AnalysisCatalog>,
    progress: Rc<dyn ProgressAggregator>,
    importer: Rc<dyn ResultImporter>,
    signer: TokenSigner,
    config: Config,
}

impl JobOrchestrator {
    pub fn new(
        queue: Rc<dyn QueueClient>,
        catalog: Rc<dyn AnalysisCatalog>,
        progress: Rc<dyn ProgressAggregator>,
        importer: Rc<dyn ResultImporter>,
        signer: TokenSigner,
        config: Config,
    ) -> Self {
        Self {
            queue,
            catalog,
            progress,
            importer,
            signer,
            config,
        }
    }

    pub fn queue_client(&self) -> &Rc<dyn QueueClient> {
        &self.queue
    }

    /// Builds everything that is sent to the remote queue for `item`.
    /// Fails without any remote call if the catalog data or the template are invalid.
    pub fn prepare_submission(&self, item: &JobItem) -> OrchestratorResult<SubmitRequest> {
        let recording = self
            .catalog
            .recording(item.audio_recording_id)
            .ok_or_else(|| {
                OrchestratorError::MissingData(format!(
                    "Audio recording {} of item {} does not exist",
                    item.audio_recording_id, item.id
                ))
            })?;
        let script = self.catalog.script(item.script_id).ok_or_else(|| {
            OrchestratorError::MissingData(format!(
                "Analysis script {} of item {} does not exist",
                item.script_id, item.id
            ))
        })?;

        let layout = ItemLayout::new(&self.config.remote.root, item);
        let context = CommandContext::new(layout, &recording, &script);
        let command = format_command(&script.command_template, context.values())?;

        let resources = self.config.base_resources.combine(&script.resources)?.calculate(
            recording.duration_seconds,
            recording.data_length_bytes,
            &self.config.minimum_resources,
        );

        let now = Utc::now();
        let subject = format!("job_item:{}", item.id);
        let issue = |scope: &str, resource: String, ttl: Duration| {
            self.signer
                .issue(&subject, scope, &resource, ttl, now)
                .map_err(|error| OrchestratorError::Token(error.to_string()))
        };
        let download_token = issue(
            MEDIA_ORIGINAL_SCOPE,
            format!("audio_recordings/{}", recording.id),
            self.config.tokens.download_ttl,
        )?;
        let hook_token = issue(
            ITEM_STATUS_SCOPE,
            format!("analysis_jobs/{}/items/{}", item.analysis_job_id, item.id),
            resources.walltime().unwrap_or_default() + self.config.tokens.hook_slack,
        )?;

        let api_url = &self.config.remote.api_url;
        let payload = build_payload(
            &context,
            script.config.as_deref(),
            &source_url(api_url, recording.id),
            &command,
        );

        Ok(SubmitRequest {
            script: payload,
            working_directory: context.layout.working_directory.clone(),
            job_name: job_name(item),
            hooks: status_hooks(&item_url(api_url, item.analysis_job_id, item.id)),
            env: vec![
                (DOWNLOAD_TOKEN_ENV.to_string(), download_token),
                (HOOK_TOKEN_ENV.to_string(), hook_token),
            ],
            resources,
        })
    }

    async fn submit(&self, item: &JobItem) -> OrchestratorResult<String> {
        let request = self.prepare_submission(item)?;
        log::debug!(
            "Submitting item {} as `{}` ({})",
            item.id,
            request.job_name,
            request.resources
        );
        let queue_id = self.queue.submit(request).await?;
        Ok(queue_id)
    }

    fn enter_queued(item: &mut JobItem, queue_id: String) {
        item.status = ItemStatus::Queued;
        item.queue_id = Some(queue_id);
        item.queued_at = Some(Utc::now());
        item.attempts += 1;
    }

    /// New -> Queued. Nothing changes if the submission fails.
    pub async fn queue(&self, item: &mut JobItem) -> OrchestratorResult<()> {
        plan(item, Event::Queue)?;
        let queue_id = self.submit(item).await?;
        log::info!("Item {} queued as job {queue_id}", item.id);
        Self::enter_queued(item, queue_id);
        clear_marker(item, Transition::Queue);
        Ok(())
    }

    /// Queued -> Working. The remote job has started; no remote call is made.
    pub fn work(&self, item: &mut JobItem) -> OrchestratorResult<()> {
        item.status = plan(item, Event::Work)?;
        item.work_started_at = Some(Utc::now());
        log::debug!("Item {} is working", item.id);
        Ok(())
    }

    /// {Queued, Working, Finished} -> Finished.
    ///
    /// `status` may carry a status that the caller has already fetched. It is used only if it
    /// belongs to the current queue id of the item and is terminal, otherwise a fresh status
    /// is fetched. Finishing an item that is already finished does nothing.
    pub async fn finish(
        &self,
        item: &mut JobItem,
        status: Option<JobStatus>,
    ) -> OrchestratorResult<()> {
        plan(item, Event::Finish)?;
        let Some(queue_id) = item.queue_id.clone() else {
            if item.status != ItemStatus::Finished {
                return Err(OrchestratorError::MissingData(format!(
                    "Item {} in state {:?} has no queue id",
                    item.id, item.status
                )));
            }
            log::debug!("Item {} is already finished", item.id);
            clear_marker(item, Transition::Finish);
            return Ok(());
        };

        let prefetched =
            status.filter(|status| status.queue_id == queue_id && status.is_terminal());
        let status = match prefetched {
            Some(status) => Some(status),
            None => match self.queue.fetch_status(&queue_id).await {
                Ok(status) => Some(status),
                Err(error) if error.is_unknown_job() => None,
                Err(error) => return Err(error.into()),
            },
        };

        match status {
            Some(status) => {
                if !status.is_terminal() {
                    return Err(OrchestratorError::RemoteNotFinished {
                        queue_id,
                        state: status.state,
                    });
                }
                if let Err(error) = self.queue.clear_history(&queue_id).await {
                    if error.is_transient() {
                        return Err(error.into());
                    }
                    log::warn!("Cannot clear history of job {queue_id}: {error}");
                }
                item.result = Some(match status.disposition() {
                    Disposition::Success => ItemResult::Success,
                    Disposition::Failed => ItemResult::Failed,
                    Disposition::Killed => ItemResult::Killed,
                });
                item.error = status.failure_message();
                item.used_walltime_seconds = status.used_walltime_seconds;
                item.used_memory_bytes = status.used_memory_bytes;
            }
            None => {
                log::error!(
                    "Job {queue_id} of item {} is not known to the batch system anymore",
                    item.id
                );
                item.result = Some(ItemResult::Failed);
                item.error = Some(format!(
                    "Job {queue_id} disappeared from the batch system before its final status was read"
                ));
                item.used_walltime_seconds = None;
                item.used_memory_bytes = None;
            }
        }

        item.status = ItemStatus::Finished;
        item.queue_id = None;
        item.finished_at = Some(Utc::now());
        clear_marker(item, Transition::Finish);
        log::info!(
            "Item {} finished with result {:?}",
            item.id,
            item.result.unwrap_or(ItemResult::Failed)
        );

        self.progress.request_update(item.analysis_job_id);
        if item.result == Some(ItemResult::Success) {
            self.importer.import_results(item);
        }
        Ok(())
    }

    /// {New, Queued, Working} -> Finished with `cancelled` result.
    /// A failure of the remote cancellation is logged and does not stop the transition.
    pub async fn cancel(&self, item: &mut JobItem) -> OrchestratorResult<()> {
        plan(item, Event::Cancel)?;
        if let Some(queue_id) = &item.queue_id {
            match self.queue.cancel(queue_id).await {
                Ok(()) => log::debug!("Job {queue_id} of item {} cancelled", item.id),
                Err(error) => {
                    log::warn!("Cannot cancel job {queue_id} of item {}: {error}", item.id)
                }
            }
        }
        item.status = ItemStatus::Finished;
        item.result = Some(ItemResult::Cancelled);
        item.queue_id = None;
        item.error = None;
        item.used_walltime_seconds = None;
        item.used_memory_bytes = None;
        item.finished_at = Some(Utc::now());
        clear_marker(item, Transition::Cancel);
        log::info!("Item {} cancelled", item.id);
        Ok(())
    }

    /// Finished -> Queued. The item is submitted again as a new attempt.
    pub async fn retry(&self, item: &mut JobItem) -> OrchestratorResult<()> {
        plan(item, Event::Retry)?;
        let queue_id = self.submit(item).await?;
        log::info!(
            "Item {} resubmitted as job {queue_id} (attempt {})",
            item.id,
            item.attempts + 1
        );
        item.result = None;
        item.error = None;
        item.work_started_at = None;
        item.finished_at = None;
        item.used_walltime_seconds = None;
        item.used_memory_bytes = None;
        Self::enter_queued(item, queue_id);
        clear_marker(item, Transition::Retry);
        Ok(())
    }

    /// Performs the slow transition requested by a marker.
    pub async fn apply(
        &self,
        item: &mut JobItem,
        transition: Transition,
    ) -> OrchestratorResult<()> {
        match transition {
            Transition::Queue => self.queue(item).await,
            Transition::Cancel => self.cancel(item).await,
            Transition::Finish => self.finish(item, None).await,
            Transition::Retry => self.retry(item).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::job::item::{ItemResult, ItemStatus, JobItem, Transition};
    use crate::job::machine::MachineError;
    use crate::job::orchestrator::{OrchestratorError, job_name};
    use crate::queue::{QueueError, RemoteJobState};
    use crate::tests::utils::{OrchestratorEnv, StatusBuilder, connection_error, queued_item};

    #[tokio::test]
    async fn queue_new_item() {
        let env = OrchestratorEnv::new();
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        item.transition = Some(Transition::Queue);
        env.orchestrator.queue(&mut item).await.unwrap();

        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.queue_id.as_deref(), Some("77.srv"));
        assert_eq!(item.attempts, 1);
        assert!(item.queued_at.is_some());
        assert_eq!(item.transition, None);
        assert!(item.validate().is_ok());

        let request = env.queue.submitted().pop().unwrap();
        assert_eq!(request.job_name, "audioq:5:1:3");
        assert_eq!(request.working_directory.to_str(), Some("/scratch/5/3/9"));
        assert!(request.hooks.pre_run.is_some());
    }

    #[tokio::test]
    async fn queue_twice_is_illegal() {
        let env = OrchestratorEnv::new();
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        env.orchestrator.queue(&mut item).await.unwrap();
        let error = env.orchestrator.queue(&mut item).await.unwrap_err();
        assert!(matches!(
            error,
            OrchestratorError::Transition(MachineError::IllegalTransition { .. })
        ));
        assert!(!error.is_retryable());
        assert_eq!(item.attempts, 1);
        assert_eq!(env.queue.submitted().len(), 1);
    }

    #[tokio::test]
    async fn queue_refused_with_pending_cancel() {
        let env = OrchestratorEnv::new();
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        item.transition = Some(Transition::Cancel);
        let before = item.clone();
        let error = env.orchestrator.queue(&mut item).await.unwrap_err();
        assert!(matches!(
            error,
            OrchestratorError::Transition(MachineError::GuardRefused { .. })
        ));
        assert_eq!(item, before);
        assert!(env.queue.calls().is_empty());
    }

    #[tokio::test]
    async fn end_to_end_submission() {
        let env =
            OrchestratorEnv::with_template("mkdir -p {output_dir}\ncp {source} {output_dir}/in");
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        env.orchestrator.queue(&mut item).await.unwrap();

        let request = env.queue.submitted().pop().unwrap();
        assert!(request.script.ends_with(
            "mkdir -p /scratch/5/3/9/output\ncp /scratch/5/3/9/source/9.wav /scratch/5/3/9/output/in\n"
        ));
        assert_eq!(item.queue_id.as_deref(), Some("77.srv"));
        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.attempts, 1);
    }

    #[tokio::test]
    async fn submission_uses_combined_resources() {
        let env = OrchestratorEnv::new();
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        env.orchestrator.queue(&mut item).await.unwrap();
        let request = env.queue.submitted().pop().unwrap();
        // Base walltime 60 + script walltime 2 * 600 seconds
        assert_eq!(request.resources.walltime, Some(1260));
        assert_eq!(request.resources.ncpus, Some(2));
    }

    #[tokio::test]
    async fn invalid_template_is_not_submitted() {
        let env = OrchestratorEnv::with_template("run {output_dir}");
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        let error = env.orchestrator.queue(&mut item).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Validation(_)));
        assert_eq!(item.status, ItemStatus::New);
        assert!(env.queue.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_recording_is_not_submitted() {
        let env = OrchestratorEnv::new();
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 100.into());
        let error = env.orchestrator.queue(&mut item).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::MissingData(_)));
        assert!(env.queue.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_submission_changes_nothing() {
        let env = OrchestratorEnv::new();
        env.queue.fail_submit(connection_error);
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        item.transition = Some(Transition::Queue);
        let before = item.clone();
        let error = env.orchestrator.queue(&mut item).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Queue(QueueError::Connection { .. })));
        assert!(error.is_retryable());
        assert_eq!(item, before);
    }

    #[test]
    fn work_records_start() {
        let env = OrchestratorEnv::new();
        let mut item = queued_item(1, "1.srv");
        env.orchestrator.work(&mut item).unwrap();
        assert_eq!(item.status, ItemStatus::Working);
        assert!(item.work_started_at.is_some());
        assert!(env.orchestrator.work(&mut item).is_err());
    }

    #[tokio::test]
    async fn cancel_queued_item() {
        let env = OrchestratorEnv::new();
        let mut item = queued_item(1, "1.srv");
        item.transition = Some(Transition::Cancel);
        env.orchestrator.cancel(&mut item).await.unwrap();

        assert_eq!(item.status, ItemStatus::Finished);
        assert_eq!(item.result, Some(ItemResult::Cancelled));
        assert_eq!(item.queue_id, None);
        assert_eq!(item.error, None);
        assert_eq!(item.used_walltime_seconds, None);
        assert_eq!(item.used_memory_bytes, None);
        assert_eq!(item.transition, None);
        assert_eq!(env.queue.calls(), vec!["cancel 1.srv"]);
        assert!(env.progress.requests().is_empty());
        assert!(item.validate().is_ok());
    }

    #[tokio::test]
    async fn cancel_survives_remote_failure() {
        let env = OrchestratorEnv::new();
        env.queue.fail_cancel(connection_error);
        let mut item = queued_item(1, "1.srv");
        env.orchestrator.cancel(&mut item).await.unwrap();
        assert_eq!(item.result, Some(ItemResult::Cancelled));
    }

    #[tokio::test]
    async fn cancel_new_item_without_remote_call() {
        let env = OrchestratorEnv::new();
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        env.orchestrator.cancel(&mut item).await.unwrap();
        assert_eq!(item.result, Some(ItemResult::Cancelled));
        assert!(env.queue.calls().is_empty());
        assert!(item.validate().is_ok());
    }

    #[tokio::test]
    async fn finish_successful_job() {
        let env = OrchestratorEnv::new();
        env.queue.set_status(
            StatusBuilder::default()
                .queue_id("1.srv")
                .walltime(Some(120))
                .memory(Some(1024))
                .finish(),
        );
        let mut item = queued_item(1, "1.srv");
        item.status = ItemStatus::Working;
        env.orchestrator.finish(&mut item, None).await.unwrap();

        assert_eq!(item.status, ItemStatus::Finished);
        assert_eq!(item.result, Some(ItemResult::Success));
        assert_eq!(item.error, None);
        assert_eq!(item.queue_id, None);
        assert_eq!(item.used_walltime_seconds, Some(120));
        assert_eq!(item.used_memory_bytes, Some(1024));
        assert!(item.finished_at.is_some());
        assert_eq!(env.queue.calls(), vec!["status 1.srv", "clear 1.srv"]);
        assert_eq!(env.progress.requests(), vec![item.analysis_job_id]);
        assert_eq!(env.importer.imported(), vec![item.id]);
    }

    #[tokio::test]
    async fn finish_failed_and_killed_jobs() {
        let env = OrchestratorEnv::new();
        env.queue.set_status(
            StatusBuilder::default()
                .queue_id("1.srv")
                .exit_code(Some(3))
                .finish(),
        );
        env.queue.set_status(
            StatusBuilder::default()
                .queue_id("2.srv")
                .exit_code(Some(271))
                .kill_reason(Some("signal 15".to_string()))
                .finish(),
        );

        let mut failed = queued_item(1, "1.srv");
        env.orchestrator.finish(&mut failed, None).await.unwrap();
        assert_eq!(failed.result, Some(ItemResult::Failed));
        assert_eq!(failed.error.as_deref(), Some("Job exited with code 3"));

        let mut killed = queued_item(2, "2.srv");
        env.orchestrator.finish(&mut killed, None).await.unwrap();
        assert_eq!(killed.result, Some(ItemResult::Killed));
        assert_eq!(killed.error.as_deref(), Some("Job was killed: signal 15"));
        assert!(env.importer.imported().is_empty());
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let env = OrchestratorEnv::new();
        env.queue.set_status(StatusBuilder::default().queue_id("1.srv").finish());
        let mut item = queued_item(1, "1.srv");
        env.orchestrator.finish(&mut item, None).await.unwrap();
        let finished = item.clone();
        let calls = env.queue.calls().len();

        env.orchestrator.finish(&mut item, None).await.unwrap();
        assert_eq!(item, finished);
        assert_eq!(env.queue.calls().len(), calls);
        assert_eq!(env.progress.requests().len(), 1);
        assert_eq!(env.importer.imported().len(), 1);
    }

    #[tokio::test]
    async fn finish_running_job_is_retryable() {
        let env = OrchestratorEnv::new();
        env.queue.set_status(
            StatusBuilder::default()
                .queue_id("1.srv")
                .state(RemoteJobState::Running)
                .exit_code(None)
                .finish(),
        );
        let mut item = queued_item(1, "1.srv");
        let before = item.clone();
        let error = env.orchestrator.finish(&mut item, None).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::RemoteNotFinished { .. }));
        assert!(error.is_retryable());
        assert_eq!(item, before);
    }

    #[tokio::test]
    async fn finish_unknown_job() {
        let env = OrchestratorEnv::new();
        let mut item = queued_item(1, "1.srv");
        env.orchestrator.finish(&mut item, None).await.unwrap();
        assert_eq!(item.result, Some(ItemResult::Failed));
        assert!(item.error.as_deref().unwrap().contains("disappeared"));
        assert_eq!(item.used_walltime_seconds, None);
        assert_eq!(env.queue.calls(), vec!["status 1.srv"]);
        assert_eq!(env.progress.requests().len(), 1);
    }

    #[tokio::test]
    async fn finish_with_prefetched_status() {
        let env = OrchestratorEnv::new();
        let mut item = queued_item(1, "1.srv");
        let status = StatusBuilder::default().queue_id("1.srv").finish();
        env.orchestrator.finish(&mut item, Some(status)).await.unwrap();
        assert_eq!(item.result, Some(ItemResult::Success));
        assert_eq!(env.queue.calls(), vec!["clear 1.srv"]);
    }

    #[tokio::test]
    async fn finish_ignores_stale_prefetched_status() {
        let env = OrchestratorEnv::new();
        env.queue.set_status(
            StatusBuilder::default()
                .queue_id("1.srv")
                .exit_code(Some(1))
                .finish(),
        );
        let mut item = queued_item(1, "1.srv");
        let other_job = StatusBuilder::default().queue_id("0.srv").finish();
        env.orchestrator
            .finish(&mut item, Some(other_job))
            .await
            .unwrap();
        assert_eq!(item.result, Some(ItemResult::Failed));
        assert_eq!(env.queue.calls(), vec!["status 1.srv", "clear 1.srv"]);
    }

    #[tokio::test]
    async fn finish_status_timeout_changes_nothing() {
        let env = OrchestratorEnv::new();
        env.queue.fail_status(connection_error);
        let mut item = queued_item(1, "1.srv");
        let before = item.clone();
        let error = env.orchestrator.finish(&mut item, None).await.unwrap_err();
        assert!(error.is_retryable());
        assert_eq!(item, before);
        assert!(env.progress.requests().is_empty());
    }

    #[tokio::test]
    async fn retry_finished_item() {
        let env = OrchestratorEnv::new();
        env.queue.set_status(
            StatusBuilder::default()
                .queue_id("77.srv")
                .exit_code(Some(1))
                .walltime(Some(10))
                .finish(),
        );
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        env.orchestrator.queue(&mut item).await.unwrap();
        env.orchestrator.work(&mut item).unwrap();
        env.orchestrator.finish(&mut item, None).await.unwrap();
        assert_eq!(item.result, Some(ItemResult::Failed));
        let first_queued_at = item.queued_at;

        item.transition = Some(Transition::Retry);
        env.orchestrator.retry(&mut item).await.unwrap();
        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.queue_id.as_deref(), Some("78.srv"));
        assert_eq!(item.attempts, 2);
        assert_eq!(item.result, None);
        assert_eq!(item.error, None);
        assert_eq!(item.work_started_at, None);
        assert_eq!(item.finished_at, None);
        assert_eq!(item.used_walltime_seconds, None);
        assert_eq!(item.transition, None);
        assert!(item.queued_at >= first_queued_at);
        assert!(item.validate().is_ok());
    }

    #[tokio::test]
    async fn retry_only_from_finished() {
        let env = OrchestratorEnv::new();
        let mut new = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        let mut queued = queued_item(2, "2.srv");
        let mut working = queued_item(3, "3.srv");
        working.status = ItemStatus::Working;
        for item in [&mut new, &mut queued, &mut working] {
            let error = env.orchestrator.retry(item).await.unwrap_err();
            assert!(matches!(
                error,
                OrchestratorError::Transition(MachineError::IllegalTransition { .. })
            ));
        }
        assert!(env.queue.calls().is_empty());
    }

    #[tokio::test]
    async fn apply_dispatches_markers() {
        let env = OrchestratorEnv::new();
        let mut item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        env.orchestrator
            .apply(&mut item, Transition::Queue)
            .await
            .unwrap();
        env.orchestrator
            .apply(&mut item, Transition::Cancel)
            .await
            .unwrap();
        assert_eq!(item.result, Some(ItemResult::Cancelled));
        assert_eq!(env.queue.calls(), vec!["submit", "cancel 77.srv"]);
    }

    #[test]
    fn job_name_format() {
        let item = JobItem::new(1.into(), 5.into(), 3.into(), 9.into());
        assert_eq!(job_name(&item), "audioq:5:1:3");
    }
}
