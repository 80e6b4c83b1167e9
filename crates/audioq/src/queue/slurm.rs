use std::fmt::Write;
use std::rc::Rc;

use crate::Map;
use crate::common::manager::info::ManagerType;
use crate::common::manager::slurm::{
    format_slurm_duration, format_slurm_memory, get_scontrol_items, parse_slurm_duration,
};
use crate::queue::common::{
    CommandRunner, check_command_output, create_working_directory, is_missing_job_output,
    output_to_str, wrap_with_hooks,
};
use crate::queue::{
    JobStatus, QueueClient, QueueError, QueueFuture, QueueResult, RemoteJobState, SubmitRequest,
};

const MISSING_JOB_PATTERNS: [&str; 2] = ["invalid job id", "already completing or completed"];

pub struct SlurmClient {
    runner: CommandRunner,
    additional_args: Rc<[String]>,
}

impl SlurmClient {
    pub fn new(runner: CommandRunner, additional_args: Vec<String>) -> Self {
        Self {
            runner,
            additional_args: additional_args.into(),
        }
    }
}

impl QueueClient for SlurmClient {
    fn manager(&self) -> ManagerType {
        ManagerType::Slurm
    }

    fn submit(&self, request: SubmitRequest) -> QueueFuture<String> {
        let runner = self.runner.clone();
        let additional_args = self.additional_args.clone();
        Box::pin(async move {
            create_working_directory(&runner, &request.working_directory).await?;
            let script = build_slurm_submit_script(&request, &additional_args);
            let output = runner
                .run(
                    &["sbatch", "--parsable"],
                    Some(&request.working_directory),
                    Some(&script),
                )
                .await?;
            let output = check_command_output("sbatch", output)?;
            let output = output_to_str("sbatch", &output.stdout)?;
            log::debug!("Sbatch output: {output}");
            parse_sbatch_output(output)
        })
    }

    fn cancel(&self, queue_id: &str) -> QueueFuture<()> {
        let runner = self.runner.clone();
        let queue_id = queue_id.to_string();
        Box::pin(async move {
            let output = runner.run(&["scancel", &queue_id], None, None).await?;
            if !output.status.success() && is_missing_job_output(&output, &MISSING_JOB_PATTERNS)
            {
                log::debug!("Slurm job {queue_id} is already gone");
                return Ok(());
            }
            check_command_output("scancel", output)?;
            Ok(())
        })
    }

    fn fetch_status(&self, queue_id: &str) -> QueueFuture<JobStatus> {
        let runner = self.runner.clone();
        let queue_id = queue_id.to_string();
        Box::pin(async move {
            let output = runner
                .run(&["scontrol", "show", "job", &queue_id], None, None)
                .await?;
            if !output.status.success()
                && is_missing_job_output(&output, &MISSING_JOB_PATTERNS[..1])
            {
                return Err(QueueError::UnknownJob(queue_id));
            }
            let output = check_command_output("scontrol", output)?;
            let output = output_to_str("scontrol", &output.stdout)?;
            parse_slurm_status(&queue_id, get_scontrol_items(output)).map_err(|error| {
                QueueError::InvalidOutput {
                    command: "scontrol".to_string(),
                    message: format!("{error:#}"),
                }
            })
        })
    }

    /// Slurm forgets finished jobs on its own.
    fn clear_history(&self, _queue_id: &str) -> QueueFuture<()> {
        Box::pin(async move { Ok(()) })
    }
}

fn parse_sbatch_output(output: &str) -> QueueResult<String> {
    let line = output.lines().map(|line| line.trim()).last().unwrap_or_default();
    let job_id = match line.strip_prefix("Submitted batch job ") {
        Some(id) => id,
        // --parsable prints `<job-id>[;<cluster>]`
        None => line.split(';').next().unwrap_or_default(),
    };
    if job_id.is_empty() || !job_id.chars().all(|c| c.is_ascii_digit() || c == '_') {
        return Err(QueueError::InvalidOutput {
            command: "sbatch".to_string(),
            message: format!("Missing job id in sbatch output\n{output}"),
        });
    }
    Ok(job_id.to_string())
}

fn parse_slurm_status(queue_id: &str, items: Map<&str, &str>) -> anyhow::Result<JobStatus> {
    let get_key = |key: &str| -> anyhow::Result<&str> {
        items
            .get(key)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Missing key {key} in Slurm scontrol output"))
    };

    let raw_state = get_key("JobState")?;
    let state = match raw_state {
        "PENDING" | "CONFIGURING" | "REQUEUED" => RemoteJobState::Queued,
        "REQUEUE_HOLD" | "REQUEUE_FED" => RemoteJobState::Held,
        "RUNNING" => RemoteJobState::Running,
        "SUSPENDED" | "STOPPED" => RemoteJobState::Suspended,
        "COMPLETING" => RemoteJobState::Exiting,
        "COMPLETED" | "FAILED" | "BOOT_FAIL" | "SPECIAL_EXIT" | "TIMEOUT" | "OUT_OF_MEMORY"
        | "CANCELLED" | "PREEMPTED" | "NODE_FAIL" | "DEADLINE" => RemoteJobState::Finished,
        state => anyhow::bail!("Unknown Slurm job state {state}"),
    };

    // ExitCode=<exit code>:<signal>
    let (exit_code, signal) = match items.get("ExitCode") {
        Some(&value) => {
            let (code, signal) = value.split_once(':').unwrap_or((value, "0"));
            (Some(code.parse::<i32>()?), signal.parse::<i32>()?)
        }
        None => (None, 0),
    };

    let kill_reason = match raw_state {
        "TIMEOUT" => Some("walltime limit exceeded".to_string()),
        "OUT_OF_MEMORY" => Some("memory limit exceeded".to_string()),
        "CANCELLED" => Some("cancelled by the batch system".to_string()),
        "PREEMPTED" => Some("preempted".to_string()),
        "NODE_FAIL" => Some("node failure".to_string()),
        "DEADLINE" => Some("deadline reached".to_string()),
        _ if state.is_terminal() && signal != 0 => Some(format!("terminated by signal {signal}")),
        _ => None,
    };

    let used_walltime_seconds = match items.get("RunTime") {
        Some(&value) if state.has_started() || state.is_terminal() => {
            Some(parse_slurm_duration(value)?.as_secs())
        }
        _ => None,
    };

    let comment = items
        .get("Comment")
        .or_else(|| items.get("Reason"))
        .filter(|value| !matches!(**value, "(null)" | "None"))
        .map(|value| value.to_string());

    let mut status = JobStatus {
        queue_id: queue_id.to_string(),
        state,
        exit_code: None,
        // scontrol does not report memory usage
        used_memory_bytes: None,
        used_walltime_seconds,
        kill_reason: None,
        comment,
    };
    if state.is_terminal() {
        status.exit_code = exit_code;
        status.kill_reason = kill_reason;
    }
    Ok(status)
}

fn build_slurm_submit_script(request: &SubmitRequest, additional_args: &[String]) -> String {
    let mut script = format!(
        "#!/bin/bash\n#SBATCH --job-name={name}\n#SBATCH --nodes=1\n",
        name = request.job_name
    );
    let resources = &request.resources;
    if let Some(walltime) = resources.walltime() {
        writeln!(script, "#SBATCH --time={}", format_slurm_duration(&walltime)).ok();
    }
    if let Some(ncpus) = resources.ncpus {
        writeln!(script, "#SBATCH --cpus-per-task={ncpus}").ok();
    }
    if let Some(mem) = resources.mem {
        writeln!(script, "#SBATCH --mem={}", format_slurm_memory(mem)).ok();
    }
    if let Some(ngpus) = resources.ngpus {
        writeln!(script, "#SBATCH --gres=gpu:{ngpus}").ok();
    }
    for arg in additional_args {
        writeln!(script, "#SBATCH {arg}").ok();
    }
    script.push('\n');
    script.push_str(&wrap_with_hooks(request));
    script
}
