use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use tokio::task::LocalSet;

use crate::client::globalsettings::GlobalSettings;
use crate::collaborators::{LoggingResultImporter, MemoryCatalog, StoreProgressAggregator};
use crate::config::Config;
use crate::job::token::TokenSigner;
use crate::job::JobOrchestrator;
use crate::queue::create_queue_client;
use crate::store::{JobItemStore, MemoryItemStore};
use crate::worker::service::create_worker_service;
use crate::worker::{PoolSummary, WorkerPool};
use crate::WrappedRcRefCell;

#[derive(Parser)]
pub struct WorkerOpts {
    #[clap(subcommand)]
    subcmd: WorkerCommand,
}

#[derive(Parser)]
enum WorkerCommand {
    /// Perform the pending transitions of job items
    Run(WorkerRunOpts),
}

#[derive(Parser)]
struct WorkerRunOpts {
    /// JSON file with job items. It is rewritten when the workers stop.
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    items: PathBuf,

    /// JSON file with audio recordings and analysis scripts
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    catalog: PathBuf,

    /// Keep running (until interrupted) and reconcile with the batch queue periodically
    #[arg(long)]
    watch: bool,

    /// Poll the batch queue for items without a marker before the workers start
    #[arg(long, conflicts_with = "watch")]
    reconcile: bool,

    /// Number of concurrent workers [default: from configuration]
    #[arg(long)]
    pool_size: Option<usize>,

    /// Maximum number of items queued or running on the cluster [default: from configuration]
    #[arg(long)]
    max_in_flight: Option<usize>,
}

pub async fn command_worker(gsettings: &GlobalSettings, opts: WorkerOpts) -> anyhow::Result<()> {
    match opts.subcmd {
        WorkerCommand::Run(opts) => run_worker(gsettings, opts).await,
    }
}

fn apply_overrides(mut config: Config, opts: &WorkerRunOpts) -> Config {
    if let Some(pool_size) = opts.pool_size {
        config.worker.pool_size = pool_size;
    }
    if opts.max_in_flight.is_some() {
        config.worker.max_in_flight = opts.max_in_flight;
    }
    config
}

async fn run_worker(gsettings: &GlobalSettings, opts: WorkerRunOpts) -> anyhow::Result<()> {
    let config = apply_overrides(gsettings.config().clone(), &opts);

    let store = WrappedRcRefCell::wrap(MemoryItemStore::open(&opts.items)?);
    let catalog = Rc::new(MemoryCatalog::load(&opts.catalog)?);
    let progress = Rc::new(StoreProgressAggregator::new(store.clone()));
    let signer = TokenSigner::from_hex(config.tokens.secret_key.as_deref())
        .context("Invalid token secret key")?;

    let orchestrator = Rc::new(JobOrchestrator::new(
        create_queue_client(&config.queue),
        catalog,
        progress.clone(),
        Rc::new(LoggingResultImporter),
        signer,
        config.clone(),
    ));
    let pool = Rc::new(WorkerPool::new(
        store.clone(),
        orchestrator,
        progress,
        config.worker.clone(),
    ));

    let local_set = LocalSet::new();
    let result = local_set
        .run_until(async {
            if opts.watch {
                run_service(pool).await.map(|_| (PoolSummary::default(), 0))
            } else {
                let reconciled = if opts.reconcile {
                    pool.reconcile().await
                } else {
                    0
                };
                Ok((pool.run_until_idle().await, reconciled))
            }
        })
        .await;

    let store = store.get();
    store.flush()?;
    let (summary, reconciled) = result?;
    let remaining = store
        .items()
        .iter()
        .filter(|item| item.transition.is_some())
        .count();
    gsettings
        .printer()
        .print_pool_summary(&summary, reconciled, remaining);
    Ok(())
}

async fn run_service(pool: Rc<WorkerPool<MemoryItemStore>>) -> anyhow::Result<()> {
    let (service, process) = create_worker_service(pool);
    let mut process = std::pin::pin!(process);
    tokio::select! {
        _ = &mut process => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Cannot listen for SIGINT")?;
            log::info!("Received SIGINT, stopping workers");
            service.stop();
            process.await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::client::commands::worker::{apply_overrides, WorkerCommand, WorkerOpts};
    use crate::config::Config;

    #[test]
    fn command_line_overrides_configuration() {
        let opts = WorkerOpts::try_parse_from([
            "worker",
            "run",
            "--items",
            "items.json",
            "--catalog",
            "catalog.json",
            "--max-in-flight",
            "10",
        ])
        .unwrap();
        let WorkerCommand::Run(opts) = opts.subcmd;

        let mut config = Config::default();
        config.worker.pool_size = 3;
        let config = apply_overrides(config, &opts);
        assert_eq!(config.worker.pool_size, 3);
        assert_eq!(config.worker.max_in_flight, Some(10));
    }
}
