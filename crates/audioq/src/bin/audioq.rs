use std::io::IsTerminal;

use clap::Parser;
use cli_table::ColorChoice;

use audioq::client::commands::items::command_items;
use audioq::client::commands::queue::command_queue;
use audioq::client::commands::resources::command_resources;
use audioq::client::commands::template::command_template;
use audioq::client::commands::worker::command_worker;
use audioq::client::globalsettings::GlobalSettings;
use audioq::client::output::cli::CliOutput;
use audioq::client::output::json::JsonOutput;
use audioq::client::output::outputs::Output;
use audioq::common::cli::{ColorPolicy, CommonOpts, Outputs, RootOptions, SubCommand};
use audioq::common::setup::setup_logging;
use audioq::config::Config;

fn make_printer(opts: &CommonOpts) -> Box<dyn Output> {
    let color_policy = match opts.colors {
        ColorPolicy::Always => ColorChoice::AlwaysAnsi,
        ColorPolicy::Auto => {
            if std::io::stdout().is_terminal() {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            }
        }
        ColorPolicy::Never => ColorChoice::Never,
    };

    match opts.output_mode {
        Outputs::Cli => {
            match color_policy {
                ColorChoice::Always | ColorChoice::AlwaysAnsi => {
                    colored::control::set_override(true)
                }
                ColorChoice::Never => colored::control::set_override(false),
                _ => {}
            }
            Box::new(CliOutput::new(color_policy))
        }
        Outputs::Json => Box::<JsonOutput>::default(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let top_opts = RootOptions::parse();

    setup_logging(top_opts.common.verbose);

    let printer = make_printer(&top_opts.common);
    let config = match Config::load(top_opts.common.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            printer.print_error(error);
            std::process::exit(1);
        }
    };
    let gsettings = GlobalSettings::new(config, printer);

    let result = match top_opts.subcmd {
        SubCommand::Template(opts) => command_template(&gsettings, opts),
        SubCommand::Resources(opts) => command_resources(&gsettings, opts),
        SubCommand::Queue(opts) => command_queue(&gsettings, opts).await,
        SubCommand::Worker(opts) => command_worker(&gsettings, opts).await,
        SubCommand::Items(opts) => command_items(&gsettings, opts),
    };

    if let Err(e) = result {
        gsettings.printer().print_error(e);
        std::process::exit(1);
    }
}
