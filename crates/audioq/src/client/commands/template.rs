use anyhow::anyhow;
use clap::Parser;

use crate::client::globalsettings::GlobalSettings;
use crate::common::placeholders::{format_command, PlaceholderMap, PlaceholderValue};

#[derive(Parser)]
pub struct TemplateOpts {
    #[clap(subcommand)]
    subcmd: TemplateCommand,
}

#[derive(Parser)]
enum TemplateCommand {
    /// Fill the placeholders of a command template
    Render(RenderOpts),
}

#[derive(Parser)]
struct RenderOpts {
    /// Command template, e.g. `run {source} -o {output_dir}`
    #[arg(long)]
    template: String,

    /// Value of a placeholder in the form NAME=VALUE
    #[arg(long = "value", value_parser = parse_placeholder_value)]
    values: Vec<(String, String)>,

    /// Placeholder that is known but has no value
    #[arg(long = "empty")]
    empty: Vec<String>,
}

fn parse_placeholder_value(input: &str) -> anyhow::Result<(String, String)> {
    match input.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(anyhow!("Expected NAME=VALUE, got `{input}`")),
    }
}

pub fn command_template(gsettings: &GlobalSettings, opts: TemplateOpts) -> anyhow::Result<()> {
    match opts.subcmd {
        TemplateCommand::Render(opts) => render(gsettings, opts),
    }
}

fn render(gsettings: &GlobalSettings, opts: RenderOpts) -> anyhow::Result<()> {
    let mut values = PlaceholderMap::new();
    for name in opts.empty {
        values.insert(name, None);
    }
    for (name, value) in opts.values {
        values.insert(name, Some(PlaceholderValue::Text(value)));
    }
    let command = format_command(&opts.template, &values)?;
    gsettings.printer().print_command(&command);
    Ok(())
}
