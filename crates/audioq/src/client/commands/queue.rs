use clap::Parser;

use crate::client::globalsettings::GlobalSettings;
use crate::queue::create_queue_client;

#[derive(Parser)]
pub struct QueueOpts {
    #[clap(subcommand)]
    subcmd: QueueCommand,
}

#[derive(Parser)]
enum QueueCommand {
    /// Show the status of a job in the batch queue
    Status(QueueJobOpts),
    /// Cancel a job in the batch queue
    Cancel(QueueJobOpts),
    /// Remove a finished job from the batch queue history
    Clear(QueueJobOpts),
}

#[derive(Parser)]
struct QueueJobOpts {
    /// Id of the job assigned by the batch queue
    queue_id: String,
}

pub async fn command_queue(gsettings: &GlobalSettings, opts: QueueOpts) -> anyhow::Result<()> {
    let client = create_queue_client(&gsettings.config().queue);
    match opts.subcmd {
        QueueCommand::Status(opts) => {
            let status = client.fetch_status(&opts.queue_id).await?;
            gsettings.printer().print_job_status(&status);
        }
        QueueCommand::Cancel(opts) => {
            client.cancel(&opts.queue_id).await?;
            gsettings.printer().print_queue_action("cancelled", &opts.queue_id);
        }
        QueueCommand::Clear(opts) => {
            client.clear_history(&opts.queue_id).await?;
            gsettings
                .printer()
                .print_queue_action("removed from history", &opts.queue_id);
        }
    }
    Ok(())
}
