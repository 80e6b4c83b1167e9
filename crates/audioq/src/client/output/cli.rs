use cli_table::format::Separator;
use cli_table::{Cell, CellStruct, Color, ColorChoice, Style, Table, TableStruct, print_stdout};
use colored::Colorize;

use crate::client::output::outputs::Output;
use crate::common::utils::str::pluralize;
use crate::job::item::{ItemResult, ItemStatus, JobItem};
use crate::queue::JobStatus;
use crate::resources::{ResourceKind, ResourceMap};
use crate::worker::PoolSummary;

pub struct CliOutput {
    color_policy: ColorChoice,
}

impl CliOutput {
    pub fn new(color_policy: ColorChoice) -> CliOutput {
        CliOutput { color_policy }
    }

    fn print_vertical_table(&self, rows: Vec<Vec<CellStruct>>) {
        let table = rows.table().separator(
            Separator::builder()
                .column(Some(Default::default()))
                .build(),
        );
        self.print_table(table);
    }

    fn print_horizontal_table(&self, rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) {
        let table = rows
            .table()
            .separator(
                Separator::builder()
                    .title(Some(Default::default()))
                    .column(Some(Default::default()))
                    .build(),
            )
            .title(header);
        self.print_table(table);
    }

    fn print_table(&self, table: TableStruct) {
        let table = table.color_choice(self.color_policy);
        if let Err(e) = print_stdout(table) {
            log::error!("Cannot print table to stdout: {e:?}");
        }
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

fn status_cell(item: &JobItem) -> CellStruct {
    let (text, color) = match (item.status, item.result) {
        (ItemStatus::New, _) => ("NEW", Color::White),
        (ItemStatus::Queued, _) => ("QUEUED", Color::Cyan),
        (ItemStatus::Working, _) => ("WORKING", Color::Yellow),
        (ItemStatus::Finished, Some(ItemResult::Success)) => ("SUCCESS", Color::Green),
        (ItemStatus::Finished, Some(ItemResult::Cancelled)) => ("CANCELLED", Color::Magenta),
        (ItemStatus::Finished, Some(ItemResult::Killed)) => ("KILLED", Color::Red),
        (ItemStatus::Finished, Some(ItemResult::Failed) | None) => ("FAILED", Color::Red),
    };
    text.cell().foreground_color(Some(color))
}

impl Output for CliOutput {
    fn print_command(&self, command: &str) {
        println!("{command}");
    }

    fn print_resources(&self, resources: &ResourceMap) {
        let rows: Vec<_> = ResourceKind::ALL
            .iter()
            .map(|kind| {
                vec![
                    kind.name().cell().bold(true),
                    optional(resources.get(*kind)).cell(),
                ]
            })
            .collect();
        self.print_vertical_table(rows);
    }

    fn print_job_status(&self, status: &JobStatus) {
        let rows = vec![
            vec!["Queue ID".cell().bold(true), status.queue_id.as_str().cell()],
            vec!["State".cell().bold(true), format!("{:?}", status.state).cell()],
            vec!["Exit code".cell().bold(true), optional(status.exit_code).cell()],
            vec![
                "Walltime (s)".cell().bold(true),
                optional(status.used_walltime_seconds).cell(),
            ],
            vec![
                "Memory (B)".cell().bold(true),
                optional(status.used_memory_bytes).cell(),
            ],
            vec![
                "Kill reason".cell().bold(true),
                optional(status.kill_reason.as_deref()).cell(),
            ],
            vec![
                "Comment".cell().bold(true),
                optional(status.comment.as_deref()).cell(),
            ],
        ];
        self.print_vertical_table(rows);
    }

    fn print_queue_action(&self, action: &str, queue_id: &str) {
        println!("Job {queue_id}: {action}");
    }

    fn print_items(&self, items: &[JobItem]) {
        let rows: Vec<_> = items
            .iter()
            .map(|item| {
                vec![
                    item.id.cell(),
                    item.analysis_job_id.cell(),
                    item.script_id.cell(),
                    item.audio_recording_id.cell(),
                    status_cell(item),
                    optional(item.transition).cell(),
                    optional(item.queue_id.as_deref()).cell(),
                    item.attempts.cell(),
                    optional(item.error.as_deref()).cell(),
                ]
            })
            .collect();
        let header = vec![
            "ID".cell().bold(true),
            "Job".cell().bold(true),
            "Script".cell().bold(true),
            "Recording".cell().bold(true),
            "State".cell().bold(true),
            "Marker".cell().bold(true),
            "Queue ID".cell().bold(true),
            "Attempts".cell().bold(true),
            "Error".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header);
    }

    fn print_marked_items(&self, marked: usize, total: usize) {
        println!(
            "Marked {marked} of {total} {}",
            pluralize("item", total)
        );
    }

    fn print_pool_summary(&self, summary: &PoolSummary, reconciled: usize, remaining: usize) {
        println!(
            "{} {}, {} postponed, {} failed",
            summary.completed,
            pluralize("transition", summary.completed),
            summary.postponed,
            summary.failed
        );
        if reconciled > 0 {
            println!(
                "{reconciled} {} updated from the batch queue",
                pluralize("item", reconciled)
            );
        }
        if remaining > 0 {
            println!(
                "{}",
                format!(
                    "{remaining} {} still marked",
                    pluralize("item is", remaining)
                )
                .yellow()
            );
        }
    }

    fn print_error(&self, error: anyhow::Error) {
        eprintln!("{error:?}");
    }
}
