use anyhow::Context;
use clap::Parser;

use crate::client::globalsettings::GlobalSettings;
use crate::resources::ResourceSet;

#[derive(Parser)]
pub struct ResourcesOpts {
    #[clap(subcommand)]
    subcmd: ResourcesCommand,
}

#[derive(Parser)]
enum ResourcesCommand {
    /// Evaluate the resources requested for a recording
    Eval(EvalOpts),
}

#[derive(Parser)]
struct EvalOpts {
    /// Resource request as JSON, e.g. `{"ncpus": 2, "walltime": {"coefficients": [2, 0], "property": "duration"}}`
    #[arg(long, default_value = "{}")]
    resources: String,

    /// Duration of the recording in seconds
    #[arg(long, default_value_t = 0.0)]
    duration: f64,

    /// Size of the recording in bytes
    #[arg(long, default_value_t = 0)]
    size: u64,

    /// Do not add the configured base resources
    #[arg(long)]
    no_base: bool,
}

pub fn command_resources(gsettings: &GlobalSettings, opts: ResourcesOpts) -> anyhow::Result<()> {
    match opts.subcmd {
        ResourcesCommand::Eval(opts) => eval(gsettings, opts),
    }
}

fn eval(gsettings: &GlobalSettings, opts: EvalOpts) -> anyhow::Result<()> {
    let config = gsettings.config();
    let request: ResourceSet =
        serde_json::from_str(&opts.resources).context("Invalid resource definition")?;
    let request = if opts.no_base {
        request
    } else {
        config.base_resources.combine(&request)?
    };
    let resources = request.calculate(opts.duration, opts.size, &config.minimum_resources);
    gsettings.printer().print_resources(&resources);
    Ok(())
}
