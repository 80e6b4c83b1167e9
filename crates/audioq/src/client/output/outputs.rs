use crate::job::item::JobItem;
use crate::queue::JobStatus;
use crate::resources::ResourceMap;
use crate::worker::PoolSummary;

pub trait Output {
    fn print_command(&self, command: &str);
    fn print_resources(&self, resources: &ResourceMap);
    fn print_job_status(&self, status: &JobStatus);
    fn print_queue_action(&self, action: &str, queue_id: &str);

    fn print_items(&self, items: &[JobItem]);
    fn print_marked_items(&self, marked: usize, total: usize);
    fn print_pool_summary(&self, summary: &PoolSummary, reconciled: usize, remaining: usize);

    fn print_error(&self, error: anyhow::Error);
}
