use std::path::{Path, PathBuf};

use clap::Parser;

use crate::client::globalsettings::GlobalSettings;
use crate::job::item::{AnalysisJobId, ItemId, Transition};
use crate::store::{JobItemStore, MemoryItemStore};

#[derive(Parser)]
pub struct ItemsOpts {
    #[clap(subcommand)]
    subcmd: ItemsCommand,
}

#[derive(Parser)]
enum ItemsCommand {
    /// Mark items with a pending transition that a worker will carry out
    Mark(MarkOpts),
    /// List items and their state
    List(ListOpts),
}

#[derive(Parser)]
struct MarkOpts {
    /// JSON file with job items
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    items: PathBuf,

    /// Transition to write
    #[arg(long, value_enum)]
    transition: Transition,

    /// Items to mark. Every item that allows the transition is marked if no id is given.
    #[arg(long = "id")]
    ids: Vec<ItemId>,
}

#[derive(Parser)]
struct ListOpts {
    /// JSON file with job items
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    items: PathBuf,

    /// Only show items of this analysis job
    #[arg(long)]
    job: Option<AnalysisJobId>,
}

pub fn command_items(gsettings: &GlobalSettings, opts: ItemsOpts) -> anyhow::Result<()> {
    match opts.subcmd {
        ItemsCommand::Mark(opts) => {
            let (marked, total) = mark_items(&opts.items, opts.transition, &opts.ids)?;
            gsettings.printer().print_marked_items(marked, total);
        }
        ItemsCommand::List(opts) => {
            let store = MemoryItemStore::load(&opts.items)?;
            let items = match opts.job {
                Some(job) => store.items_of_job(job),
                None => store.items(),
            };
            gsettings.printer().print_items(&items);
        }
    }
    Ok(())
}

/// Writes `transition` to the selected items of an item file.
/// Returns the number of marked items and the number of considered items.
fn mark_items(
    path: &Path,
    transition: Transition,
    ids: &[ItemId],
) -> anyhow::Result<(usize, usize)> {
    let mut store = MemoryItemStore::load(path)?;
    let (selection, total) = if ids.is_empty() {
        (None, store.items().len())
    } else {
        (Some(ids), ids.len())
    };
    let marked = store.mark_transitions(selection, transition);
    log::debug!("Marked {marked} items with {transition}");
    store.save(path)?;
    Ok((marked, total))
}
