//! Assembly of the self-contained script that runs an analysis on a compute node.
use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::common::utils::str::shell_quote;
use crate::job::context::CommandContext;
use crate::job::item::{AnalysisJobId, ItemId, RecordingId};
use crate::queue::Hooks;

/// Delimiter of the heredoc with the configuration file. It is quoted, so the shell does not
/// expand anything in the heredoc body, which is base64 text anyway.
const CONFIG_HEREDOC_DELIMITER: &str = "AUDIOQ_CONFIG_EOF";
const BASE64_LINE_LENGTH: usize = 76;

pub const DOWNLOAD_TOKEN_ENV: &str = "AUDIOQ_DOWNLOAD_TOKEN";
pub const HOOK_TOKEN_ENV: &str = "AUDIOQ_HOOK_TOKEN";

/// Status reported by the status hooks of a running item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    Working,
    Successful,
    Failed,
}

impl HookStatus {
    fn as_str(&self) -> &'static str {
        match self {
            HookStatus::Working => "working",
            HookStatus::Successful => "successful",
            HookStatus::Failed => "failed",
        }
    }
}

pub fn source_url(api_url: &str, recording: RecordingId) -> String {
    format!(
        "{}/audio_recordings/{recording}/original",
        api_url.trim_end_matches('/')
    )
}

pub fn item_url(api_url: &str, job: AnalysisJobId, item: ItemId) -> String {
    format!(
        "{}/analysis_jobs/{job}/items/{item}",
        api_url.trim_end_matches('/')
    )
}

fn log_step(script: &mut String, message: &str) {
    writeln!(script, "echo {}", shell_quote(&format!("[audioq] {message}"))).ok();
}

/// Builds the payload script: source download, configuration file, scratch directories and
/// finally the templated analysis command.
pub fn build_payload(
    context: &CommandContext,
    config: Option<&str>,
    source_url: &str,
    command: &str,
) -> String {
    let layout = &context.layout;
    let quote_path = |path: &std::path::Path| shell_quote(&path.display().to_string()).into_owned();

    let mut script = String::from("set -eu\n");

    log_step(&mut script, "downloading source audio");
    writeln!(script, "mkdir -p {}", quote_path(&layout.source_dir)).ok();
    writeln!(
        script,
        "curl --fail --silent --show-error --location --retry 3 --header \"Authorization: Bearer ${DOWNLOAD_TOKEN_ENV}\" --output {} {}",
        quote_path(&context.source),
        shell_quote(source_url)
    )
    .ok();

    log_step(&mut script, "writing config file");
    writeln!(script, "mkdir -p {}", quote_path(&layout.config_dir)).ok();
    if let (Some(path), Some(config)) = (&context.config, config) {
        writeln!(
            script,
            "base64 --decode > {} <<'{CONFIG_HEREDOC_DELIMITER}'",
            quote_path(path)
        )
        .ok();
        let encoded = STANDARD.encode(config);
        for line in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
            // base64 output is ASCII
            script.push_str(&String::from_utf8_lossy(line));
            script.push('\n');
        }
        writeln!(script, "{CONFIG_HEREDOC_DELIMITER}").ok();
    }

    log_step(&mut script, "creating output directories");
    writeln!(
        script,
        "mkdir -p {} {}",
        quote_path(&layout.output_dir),
        quote_path(&layout.temp_dir)
    )
    .ok();

    log_step(&mut script, "running analysis");
    script.push_str(command.trim_end());
    script.push('\n');
    script
}

/// Reports `status` of an item to the web API. Failures are ignored, so that an unavailable
/// API never changes the outcome of the job.
pub fn status_hook(item_url: &str, status: HookStatus) -> String {
    format!(
        "curl --silent --show-error --retry 3 --request PUT --header \"Authorization: Bearer ${HOOK_TOKEN_ENV}\" --header 'Content-Type: application/json' --data '{{\"status\":\"{}\"}}' {} || true",
        status.as_str(),
        shell_quote(item_url)
    )
}

pub fn status_hooks(item_url: &str) -> Hooks {
    Hooks {
        pre_run: Some(status_hook(item_url, HookStatus::Working)),
        on_success: Some(status_hook(item_url, HookStatus::Successful)),
        on_error: Some(status_hook(item_url, HookStatus::Failed)),
    }
}
