use std::fmt::Write;
use std::rc::Rc;
use std::time::Duration;

use crate::common::manager::info::ManagerType;
use crate::common::manager::pbs::{format_pbs_duration, format_pbs_memory, parse_pbs_memory};
use crate::common::utils::time::parse_hms_time;
use crate::queue::common::{
    CommandRunner, check_command_output, create_working_directory, is_missing_job_output,
    output_to_str, wrap_with_hooks,
};
use crate::queue::{
    JobStatus, QueueClient, QueueError, QueueFuture, QueueResult, RemoteJobState, SubmitRequest,
};

/// Messages of `qdel`/`qstat` for jobs that are not (or no longer) tracked.
const MISSING_JOB_PATTERNS: [&str; 2] = ["unknown job id", "job has finished"];

/// Exit codes above this value mean that the job was killed by a signal.
const PBS_SIGNAL_EXIT_OFFSET: i32 = 256;

pub struct PbsClient {
    runner: CommandRunner,
    additional_args: Rc<[String]>,
}

impl PbsClient {
    pub fn new(runner: CommandRunner, additional_args: Vec<String>) -> Self {
        Self {
            runner,
            additional_args: additional_args.into(),
        }
    }

    fn remove(&self, queue_id: &str, history: bool) -> QueueFuture<()> {
        let runner = self.runner.clone();
        let queue_id = queue_id.to_string();
        Box::pin(async move {
            let mut arguments = vec!["qdel"];
            if history {
                arguments.extend_from_slice(&["-x", "-W", "force"]);
            }
            arguments.push(&queue_id);

            let output = runner.run(&arguments, None, None).await?;
            if !output.status.success() && is_missing_job_output(&output, &MISSING_JOB_PATTERNS)
            {
                log::debug!("PBS job {queue_id} is already gone");
                return Ok(());
            }
            check_command_output("qdel", output)?;
            Ok(())
        })
    }
}

impl QueueClient for PbsClient {
    fn manager(&self) -> ManagerType {
        ManagerType::Pbs
    }

    fn submit(&self, request: SubmitRequest) -> QueueFuture<String> {
        let runner = self.runner.clone();
        let additional_args = self.additional_args.clone();
        Box::pin(async move {
            create_working_directory(&runner, &request.working_directory).await?;
            let script = build_pbs_submit_script(&request, &additional_args);
            let output = runner
                .run(&["qsub"], Some(&request.working_directory), Some(&script))
                .await?;
            let output = check_command_output("qsub", output)?;
            let job_id = output_to_str("qsub", &output.stdout)?;
            if job_id.is_empty() {
                return Err(QueueError::InvalidOutput {
                    command: "qsub".to_string(),
                    message: "missing job id".to_string(),
                });
            }
            Ok(job_id.to_string())
        })
    }

    fn cancel(&self, queue_id: &str) -> QueueFuture<()> {
        self.remove(queue_id, false)
    }

    fn fetch_status(&self, queue_id: &str) -> QueueFuture<JobStatus> {
        let runner = self.runner.clone();
        let queue_id = queue_id.to_string();
        Box::pin(async move {
            // -x will also display finished jobs
            let output = runner
                .run(&["qstat", "-x", "-f", "-F", "json", &queue_id], None, None)
                .await?;
            if !output.status.success() && is_missing_job_output(&output, &MISSING_JOB_PATTERNS[..1])
            {
                return Err(QueueError::UnknownJob(queue_id));
            }
            let output = check_command_output("qstat", output)?;
            parse_qstat_output(&queue_id, &output.stdout)
        })
    }

    fn clear_history(&self, queue_id: &str) -> QueueFuture<()> {
        self.remove(queue_id, true)
    }
}

fn build_pbs_submit_script(request: &SubmitRequest, additional_args: &[String]) -> String {
    let mut script = format!(
        "#!/bin/bash\n#PBS -N {name}\n#PBS -j oe\n",
        name = request.job_name
    );
    let resources = &request.resources;
    if let Some(walltime) = resources.walltime() {
        writeln!(script, "#PBS -l walltime={}", format_pbs_duration(&walltime)).ok();
    }

    let mut select = String::from("select=1");
    if let Some(ncpus) = resources.ncpus {
        write!(select, ":ncpus={ncpus}").ok();
    }
    if let Some(mem) = resources.mem {
        write!(select, ":mem={}", format_pbs_memory(mem)).ok();
    }
    if let Some(ngpus) = resources.ngpus {
        write!(select, ":ngpus={ngpus}").ok();
    }
    writeln!(script, "#PBS -l {select}").ok();

    for arg in additional_args {
        writeln!(script, "#PBS {arg}").ok();
    }
    script.push('\n');
    script.push_str(&wrap_with_hooks(request));
    script
}

fn parse_qstat_output(queue_id: &str, output: &[u8]) -> QueueResult<JobStatus> {
    let invalid = |message: String| QueueError::InvalidOutput {
        command: "qstat".to_string(),
        message,
    };

    let data: serde_json::Value = serde_json::from_slice(output)
        .map_err(|error| invalid(format!("Cannot parse qstat JSON output: {error}")))?;
    let jobs = &data["Jobs"];
    let job = jobs
        .get(queue_id)
        .or_else(|| {
            // Some servers print the job id with a different server suffix
            let jobs = jobs.as_object()?;
            if jobs.len() == 1 {
                jobs.values().next()
            } else {
                None
            }
        })
        .ok_or_else(|| QueueError::UnknownJob(queue_id.to_string()))?;
    parse_job_status(queue_id, job).map_err(|error| invalid(format!("{error:#}")))
}

fn parse_job_status(queue_id: &str, job: &serde_json::Value) -> anyhow::Result<JobStatus> {
    let state = job["job_state"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("JSON key job_state not found"))?;
    let state = match state {
        "Q" => RemoteJobState::Queued,
        "H" => RemoteJobState::Held,
        "W" => RemoteJobState::Waiting,
        "T" => RemoteJobState::Transit,
        "M" => RemoteJobState::Moved,
        "S" | "U" => RemoteJobState::Suspended,
        "B" => RemoteJobState::Begun,
        "R" => RemoteJobState::Running,
        "E" => RemoteJobState::Exiting,
        "F" | "X" => RemoteJobState::Finished,
        state => anyhow::bail!("Unknown PBS job state {state}"),
    };

    let exit_code = job["Exit_status"].as_i64().map(|code| code as i32);
    let used = &job["resources_used"];
    let used_walltime_seconds = used["walltime"]
        .as_str()
        .map(parse_hms_time)
        .transpose()?
        .map(|walltime: Duration| walltime.as_secs());
    let used_memory_bytes = used["mem"].as_str().map(parse_pbs_memory).transpose()?;

    let kill_reason = match exit_code {
        Some(code) if code > PBS_SIGNAL_EXIT_OFFSET => Some(format!(
            "terminated by signal {}",
            code - PBS_SIGNAL_EXIT_OFFSET
        )),
        Some(code) if code < 0 => Some(format!("aborted by PBS with exit status {code}")),
        _ => None,
    };

    Ok(JobStatus {
        queue_id: queue_id.to_string(),
        state,
        exit_code: if state.is_terminal() { exit_code } else { None },
        used_walltime_seconds,
        used_memory_bytes,
        kill_reason: if state.is_terminal() { kill_reason } else { None },
        comment: job["comment"].as_str().map(|comment| comment.to_string()),
    })
}
