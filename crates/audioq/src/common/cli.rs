use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::client::commands::items::ItemsOpts;
use crate::client::commands::queue::QueueOpts;
use crate::client::commands::resources::ResourcesOpts;
use crate::client::commands::template::TemplateOpts;
use crate::client::commands::worker::WorkerOpts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Outputs {
    #[value(name = "cli")]
    Cli,
    #[value(name = "json")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorPolicy {
    /// Use colors if the stdout is detected to be a terminal.
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

#[derive(Parser)]
pub struct CommonOpts {
    /// Path to the configuration file
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        global = true,
        env = "AUDIOQ_CONFIG",
        help_heading("GLOBAL OPTIONS")
    )]
    pub config: Option<PathBuf>,

    /// Sets console color policy
    #[arg(
        long,
        default_value_t = ColorPolicy::Auto,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS")
    )]
    pub colors: ColorPolicy,

    /// Sets output formatting
    #[arg(
        long,
        env = "AUDIOQ_OUTPUT_MODE",
        default_value = "cli",
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS")
    )]
    pub output_mode: Outputs,

    /// Turn on a more detailed log output
    #[arg(long, short, global = true, help_heading("GLOBAL OPTIONS"))]
    pub verbose: bool,
}

/// Orchestrates analysis of audio recordings on PBS/Slurm batch queues
#[derive(Parser)]
#[command(author, about, version(crate::AUDIOQ_VERSION))]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Render analysis command templates
    Template(TemplateOpts),
    /// Evaluate resource requests
    Resources(ResourcesOpts),
    /// Talk directly to the configured batch queue
    Queue(QueueOpts),
    /// Run workers that perform pending transitions
    Worker(WorkerOpts),
    /// Inspect and mark job items
    Items(ItemsOpts),
}
