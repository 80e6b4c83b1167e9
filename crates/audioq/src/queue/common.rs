use std::fmt::Write;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use bstr::ByteSlice;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::common::utils::str::shell_quote;
use crate::queue::{QueueError, QueueResult, SubmitRequest};

/// Exit code reported by `ssh` when the connection itself failed.
const SSH_CONNECTION_ERROR: i32 = 255;

/// Runs batch system commands, either locally or on a login node through `ssh`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    ssh_target: Option<String>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(ssh_target: Option<String>, timeout: Duration) -> Self {
        Self {
            ssh_target,
            timeout,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.ssh_target.is_some()
    }

    /// Runs `arguments` in `workdir` and returns its output, regardless of its exit code.
    /// `stdin` is written to the standard input of the command.
    pub async fn run(
        &self,
        arguments: &[&str],
        workdir: Option<&Path>,
        stdin: Option<&str>,
    ) -> QueueResult<Output> {
        let display = arguments.join(" ");
        log::debug!(
            "Running command `{display}`{}",
            self.ssh_target
                .as_deref()
                .map(|target| format!(" on {target}"))
                .unwrap_or_default()
        );

        let mut command = self.create_command(arguments, workdir);
        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let execute = async {
            let mut child = command.spawn().map_err(|error| QueueError::Connection {
                command: display.clone(),
                message: error.to_string(),
            })?;
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input.as_bytes())
                    .await
                    .map_err(|error| QueueError::Connection {
                        command: display.clone(),
                        message: format!("Cannot write standard input: {error}"),
                    })?;
            }
            child
                .wait_with_output()
                .await
                .map_err(|error| QueueError::Connection {
                    command: display.clone(),
                    message: error.to_string(),
                })
        };

        let output = tokio::time::timeout(self.timeout, execute)
            .await
            .map_err(|_| QueueError::Timeout {
                command: display.clone(),
                timeout: self.timeout,
            })??;

        log::trace!(
            "Command `{display}` output\nStdout\n{}Stderr\n{}",
            output.stdout.to_str_lossy(),
            output.stderr.to_str_lossy()
        );

        if self.is_remote() && output.status.code() == Some(SSH_CONNECTION_ERROR) {
            return Err(QueueError::Connection {
                command: display,
                message: output.stderr.to_str_lossy().trim().to_string(),
            });
        }
        Ok(output)
    }

    fn create_command(&self, arguments: &[&str], workdir: Option<&Path>) -> Command {
        match &self.ssh_target {
            Some(target) => {
                let mut remote = String::new();
                if let Some(workdir) = workdir {
                    write!(
                        remote,
                        "cd {} && ",
                        shell_quote(&workdir.display().to_string())
                    )
                    .ok();
                }
                let quoted: Vec<_> = arguments.iter().map(|arg| shell_quote(arg)).collect();
                remote.push_str(&quoted.join(" "));

                let mut command = Command::new("ssh");
                command.args(["-o", "BatchMode=yes", target.as_str(), "--", &remote]);
                command
            }
            None => {
                let mut command = Command::new(arguments[0]);
                command.args(&arguments[1..]);
                if let Some(workdir) = workdir {
                    command.current_dir(workdir);
                }
                command
            }
        }
    }
}

pub fn check_command_output(command: &str, output: Output) -> QueueResult<Output> {
    let status = output.status;
    if !status.success() {
        return Err(QueueError::CommandFailed {
            command: command.to_string(),
            message: format!(
                "Exit code: {}\nStderr: {}\nStdout: {}",
                status.code().unwrap_or(-1),
                output.stderr.to_str_lossy().trim(),
                output.stdout.to_str_lossy().trim()
            ),
        });
    }
    Ok(output)
}

pub fn output_to_str<'a>(command: &str, output: &'a [u8]) -> QueueResult<&'a str> {
    output
        .to_str()
        .map(|output| output.trim())
        .map_err(|error| QueueError::InvalidOutput {
            command: command.to_string(),
            message: format!("Invalid UTF-8: {error}"),
        })
}

/// Returns true if the command failed only because the batch system does not know the job
/// (anymore), which is what every idempotent removal wants.
pub fn is_missing_job_output(output: &Output, patterns: &[&str]) -> bool {
    let stderr = output.stderr.to_str_lossy().to_lowercase();
    let stdout = output.stdout.to_str_lossy().to_lowercase();
    patterns
        .iter()
        .any(|pattern| stderr.contains(pattern) || stdout.contains(pattern))
}

/// Creates the job working directory. Must happen before submission, because the batch
/// system writes job output into it.
pub async fn create_working_directory(runner: &CommandRunner, directory: &Path) -> QueueResult<()> {
    let directory = directory.display().to_string();
    let output = runner.run(&["mkdir", "-p", &directory], None, None).await?;
    check_command_output("mkdir", output)?;
    Ok(())
}

/// Builds the part of the submitted script that follows the batch system directives.
///
/// The payload runs in a subshell, so that it cannot skip the hooks by calling `exit`.
/// The exit code of the payload is the exit code of the whole job.
pub fn wrap_with_hooks(request: &SubmitRequest) -> String {
    let mut script = String::new();
    writeln!(
        script,
        "cd {} || exit 1",
        shell_quote(&request.working_directory.display().to_string())
    )
    .ok();
    for (key, value) in &request.env {
        writeln!(script, "export {key}={}", shell_quote(value)).ok();
    }
    if let Some(pre_run) = &request.hooks.pre_run {
        writeln!(script, "{}", pre_run.trim_end()).ok();
    }

    script.push_str("(\n");
    script.push_str(request.script.trim_end());
    script.push_str("\n)\nAUDIOQ_EXIT_CODE=$?\n");

    match (&request.hooks.on_success, &request.hooks.on_error) {
        (None, None) => {}
        (Some(on_success), None) => {
            writeln!(
                script,
                "if [ \"$AUDIOQ_EXIT_CODE\" -eq 0 ]; then\n{}\nfi",
                on_success.trim_end()
            )
            .ok();
        }
        (None, Some(on_error)) => {
            writeln!(
                script,
                "if [ \"$AUDIOQ_EXIT_CODE\" -ne 0 ]; then\n{}\nfi",
                on_error.trim_end()
            )
            .ok();
        }
        (Some(on_success), Some(on_error)) => {
            writeln!(
                script,
                "if [ \"$AUDIOQ_EXIT_CODE\" -eq 0 ]; then\n{}\nelse\n{}\nfi",
                on_success.trim_end(),
                on_error.trim_end()
            )
            .ok();
        }
    }
    script.push_str("exit $AUDIOQ_EXIT_CODE\n");
    script
}
