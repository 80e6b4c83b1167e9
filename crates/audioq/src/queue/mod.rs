pub mod common;
pub mod pbs;
pub mod slurm;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::manager::info::ManagerType;
use crate::config::QueueConfig;
use crate::queue::common::CommandRunner;
use crate::queue::pbs::PbsClient;
use crate::queue::slurm::SlurmClient;
use crate::resources::ResourceMap;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job `{0}` is not known to the batch system")]
    UnknownJob(String),
    #[error("Command `{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("Cannot reach the batch system with `{command}`: {message}")]
    Connection { command: String, message: String },
    #[error("Command `{command}` failed\n{message}")]
    CommandFailed { command: String, message: String },
    #[error("Invalid output of `{command}`: {message}")]
    InvalidOutput { command: String, message: String },
}

impl QueueError {
    /// Transient errors may succeed when the same call is repeated later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Timeout { .. } | QueueError::Connection { .. }
        )
    }

    pub fn is_unknown_job(&self) -> bool {
        matches!(self, QueueError::UnknownJob(_))
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
pub type QueueFuture<T> = Pin<Box<dyn Future<Output = QueueResult<T>>>>;

/// Shell snippets that are executed around the submitted payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hooks {
    /// Runs before the payload.
    pub pre_run: Option<String>,
    /// Runs after the payload if it exited with zero exit code.
    pub on_success: Option<String>,
    /// Runs after the payload if it exited with a non-zero exit code.
    pub on_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    /// Shell script that performs the actual work.
    pub script: String,
    /// Directory on the cluster in which the job runs. It is created before submission.
    pub working_directory: PathBuf,
    pub job_name: String,
    pub hooks: Hooks,
    /// Environment variables exported before any hook runs.
    pub env: Vec<(String, String)>,
    pub resources: ResourceMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteJobState {
    Queued,
    Held,
    Waiting,
    Transit,
    Moved,
    Suspended,
    Begun,
    Running,
    Exiting,
    Finished,
}

impl RemoteJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteJobState::Finished)
    }

    /// The payload has already started on a compute node.
    pub fn has_started(&self) -> bool {
        matches!(
            self,
            RemoteJobState::Begun | RemoteJobState::Running | RemoteJobState::Exiting
        )
    }
}

/// How a finished remote job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    Failed,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub queue_id: String,
    pub state: RemoteJobState,
    pub exit_code: Option<i32>,
    pub used_walltime_seconds: Option<u64>,
    pub used_memory_bytes: Option<u64>,
    /// Set when the batch system (not the payload) terminated the job.
    pub kill_reason: Option<String>,
    pub comment: Option<String>,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn disposition(&self) -> Disposition {
        if self.kill_reason.is_some() {
            Disposition::Killed
        } else if self.exit_code == Some(0) {
            Disposition::Success
        } else {
            Disposition::Failed
        }
    }

    /// Human readable explanation of an unsuccessful run.
    pub fn failure_message(&self) -> Option<String> {
        let mut message = match (self.disposition(), &self.kill_reason) {
            (Disposition::Success, _) => return None,
            (Disposition::Killed, Some(reason)) => format!("Job was killed: {reason}"),
            _ => match self.exit_code {
                Some(code) => format!("Job exited with code {code}"),
                None => "Job finished without an exit code".to_string(),
            },
        };
        if let Some(comment) = self.comment.as_deref().filter(|c| !c.is_empty()) {
            message.push_str(&format!(" ({comment})"));
        }
        Some(message)
    }
}

/// Client of a remote batch queue (e.g. PBS/Slurm).
///
/// The futures are not `Send`; clients are used from a single threaded `LocalSet`.
pub trait QueueClient {
    fn manager(&self) -> ManagerType;

    /// Submits a job and returns its queue id.
    fn submit(&self, request: SubmitRequest) -> QueueFuture<String>;

    /// Cancels a job. Cancelling a job that the batch system does not know succeeds.
    fn cancel(&self, queue_id: &str) -> QueueFuture<()>;

    /// Fetches the current status of a job, or [`QueueError::UnknownJob`].
    fn fetch_status(&self, queue_id: &str) -> QueueFuture<JobStatus>;

    /// Removes a finished job from the batch system history, if it keeps one.
    fn clear_history(&self, queue_id: &str) -> QueueFuture<()>;
}

pub fn create_queue_client(config: &QueueConfig) -> Rc<dyn QueueClient> {
    let runner = CommandRunner::new(config.ssh_target.clone(), config.command_timeout);
    let additional_args = config.additional_args.clone();
    log::debug!(
        "Using {} queue{}",
        config.manager,
        config
            .ssh_target
            .as_deref()
            .map(|target| format!(" through ssh `{target}`"))
            .unwrap_or_default()
    );
    match config.manager {
        ManagerType::Pbs => Rc::new(PbsClient::new(runner, additional_args)),
        ManagerType::Slurm => Rc::new(SlurmClient::new(runner, additional_args)),
    }
}

#[cfg(test)]
mod tests {
    use crate::queue::{Disposition, JobStatus, QueueError, RemoteJobState};
    use std::time::Duration;

    fn status(exit_code: Option<i32>, kill_reason: Option<&str>) -> JobStatus {
        JobStatus {
            queue_id: "1".to_string(),
            state: RemoteJobState::Finished,
            exit_code,
            used_walltime_seconds: None,
            used_memory_bytes: None,
            kill_reason: kill_reason.map(|r| r.to_string()),
            comment: None,
        }
    }

    #[test]
    fn disposition_success() {
        assert_eq!(status(Some(0), None).disposition(), Disposition::Success);
        assert_eq!(status(Some(0), None).failure_message(), None);
    }

    #[test]
    fn disposition_failed() {
        assert_eq!(status(Some(1), None).disposition(), Disposition::Failed);
        assert_eq!(status(None, None).disposition(), Disposition::Failed);
        assert_eq!(
            status(Some(3), None).failure_message().unwrap(),
            "Job exited with code 3"
        );
    }

    #[test]
    fn disposition_killed() {
        let status = status(Some(271), Some("walltime exceeded"));
        assert_eq!(status.disposition(), Disposition::Killed);
        assert_eq!(
            status.failure_message().unwrap(),
            "Job was killed: walltime exceeded"
        );
    }

    #[test]
    fn failure_message_with_comment() {
        let mut status = status(Some(2), None);
        status.comment = Some("Job run at Mon".to_string());
        assert_eq!(
            status.failure_message().unwrap(),
            "Job exited with code 2 (Job run at Mon)"
        );
    }

    #[test]
    fn transient_errors() {
        assert!(
            QueueError::Timeout {
                command: "qstat".to_string(),
                timeout: Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(
            QueueError::Connection {
                command: "qstat".to_string(),
                message: "refused".to_string()
            }
            .is_transient()
        );
        assert!(!QueueError::UnknownJob("1".to_string()).is_transient());
        assert!(
            !QueueError::CommandFailed {
                command: "qsub".to_string(),
                message: "bad".to_string()
            }
            .is_transient()
        );
    }
}
