use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::define_id_type;

define_id_type!(ItemId, u64);
define_id_type!(AnalysisJobId, u64);
define_id_type!(ScriptId, u64);
define_id_type!(RecordingId, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    New,
    Queued,
    Working,
    Finished,
}

impl ItemStatus {
    /// The item is tracked by the remote batch system.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ItemStatus::Queued | ItemStatus::Working)
    }
}

/// Pending intent written by administrative actions and carried out later by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Queue,
    Cancel,
    Finish,
    Retry,
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Transition::Queue => "queue",
            Transition::Cancel => "cancel",
            Transition::Finish => "finish",
            Transition::Retry => "retry",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemResult {
    Success,
    Failed,
    Killed,
    Cancelled,
}

/// A single analysis script executed against a single audio recording within an analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItem {
    pub id: ItemId,
    pub analysis_job_id: AnalysisJobId,
    pub script_id: ScriptId,
    pub audio_recording_id: RecordingId,
    pub status: ItemStatus,
    #[serde(default)]
    pub transition: Option<Transition>,
    #[serde(default)]
    pub queue_id: Option<String>,
    #[serde(default)]
    pub result: Option<ItemResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub work_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub used_walltime_seconds: Option<u64>,
    #[serde(default)]
    pub used_memory_bytes: Option<u64>,
}

impl JobItem {
    pub fn new(
        id: ItemId,
        analysis_job_id: AnalysisJobId,
        script_id: ScriptId,
        audio_recording_id: RecordingId,
    ) -> Self {
        Self {
            id,
            analysis_job_id,
            script_id,
            audio_recording_id,
            status: ItemStatus::New,
            transition: None,
            queue_id: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            queued_at: None,
            work_started_at: None,
            finished_at: None,
            attempts: 0,
            used_walltime_seconds: None,
            used_memory_bytes: None,
        }
    }

    /// Checks the relations between the status and the other fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_id.is_some() != self.status.is_in_flight() {
            return Err(format!(
                "item {} is {:?} but its queue id is {:?}",
                self.id, self.status, self.queue_id
            ));
        }
        if self.result.is_some() != (self.status == ItemStatus::Finished) {
            return Err(format!(
                "item {} is {:?} but its result is {:?}",
                self.id, self.status, self.result
            ));
        }
        // Items cancelled before their first submission keep zero attempts
        if self.status != ItemStatus::New
            && self.attempts == 0
            && self.result != Some(ItemResult::Cancelled)
        {
            return Err(format!("item {} was never submitted", self.id));
        }
        if self.result == Some(ItemResult::Cancelled)
            && (self.error.is_some()
                || self.used_walltime_seconds.is_some()
                || self.used_memory_bytes.is_some())
        {
            return Err(format!(
                "cancelled item {} has an error or usage statistics",
                self.id
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::job::item::{ItemResult, ItemStatus, JobItem, Transition};

    fn item() -> JobItem {
        JobItem::new(1.into(), 2.into(), 3.into(), 4.into())
    }

    #[test]
    fn new_item_is_valid() {
        let item = item();
        assert_eq!(item.status, ItemStatus::New);
        assert!(item.validate().is_ok());
    }

    #[test]
    fn queued_item_needs_queue_id() {
        let mut item = item();
        item.status = ItemStatus::Queued;
        item.attempts = 1;
        assert!(item.validate().is_err());
        item.queue_id = Some("1.pbs".to_string());
        assert!(item.validate().is_ok());
    }

    #[test]
    fn finished_item_needs_result() {
        let mut item = item();
        item.status = ItemStatus::Finished;
        item.attempts = 1;
        assert!(item.validate().is_err());
        item.result = Some(ItemResult::Success);
        assert!(item.validate().is_ok());
    }

    #[test]
    fn cancelled_item_without_usage() {
        let mut item = item();
        item.status = ItemStatus::Finished;
        item.result = Some(ItemResult::Cancelled);
        assert!(item.validate().is_ok());
        item.result = Some(ItemResult::Failed);
        assert!(item.validate().is_err());
        item.result = Some(ItemResult::Cancelled);
        item.used_walltime_seconds = Some(1);
        assert!(item.validate().is_err());
    }

    #[test]
    fn deserialize_minimal_item() {
        let item: JobItem = serde_json::from_str(
            r#"{"id": 1, "analysis_job_id": 2, "script_id": 3, "audio_recording_id": 4,
                "status": "new", "transition": "queue", "created_at": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(item.id.as_num(), 1);
        assert_eq!(item.transition, Some(Transition::Queue));
        assert_eq!(item.attempts, 0);
    }
}
