use serde_json::json;

use crate::client::output::outputs::Output;
use crate::job::item::JobItem;
use crate::queue::JobStatus;
use crate::resources::ResourceMap;
use crate::worker::PoolSummary;

#[derive(Default)]
pub struct JsonOutput;

impl JsonOutput {
    fn print(&self, data: serde_json::Value) {
        match serde_json::to_string_pretty(&data) {
            Ok(value) => println!("{value}"),
            Err(e) => log::error!("Cannot serialize output: {e:?}"),
        }
    }
}

impl Output for JsonOutput {
    fn print_command(&self, command: &str) {
        self.print(json!({ "command": command }));
    }

    fn print_resources(&self, resources: &ResourceMap) {
        self.print(json!(resources));
    }

    fn print_job_status(&self, status: &JobStatus) {
        self.print(json!(status));
    }

    fn print_queue_action(&self, action: &str, queue_id: &str) {
        self.print(json!({
            "queue_id": queue_id,
            "action": action,
        }));
    }

    fn print_items(&self, items: &[JobItem]) {
        self.print(json!(items));
    }

    fn print_marked_items(&self, marked: usize, total: usize) {
        self.print(json!({
            "marked": marked,
            "total": total,
        }));
    }

    fn print_pool_summary(&self, summary: &PoolSummary, reconciled: usize, remaining: usize) {
        self.print(json!({
            "transitions": summary,
            "reconciled": reconciled,
            "remaining_markers": remaining,
        }));
    }

    fn print_error(&self, error: anyhow::Error) {
        self.print(json!({ "error": format!("{error:?}") }));
    }
}
