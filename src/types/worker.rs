//! Worker identity record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;

/// Status of a registered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Running,
    Finished,
    Error,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Finished => write!(f, "finished"),
            WorkerStatus::Error => write!(f, "error"),
        }
    }
}

/// A registered worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: u64,

    /// Host the worker runs on
    pub host: String,

    #[serde(default)]
    pub status: WorkerStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_time: Option<DateTime<Utc>>,

    /// Task currently being executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<TaskId>,

    /// Fatal error that stopped the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub success_tasks: Vec<TaskId>,

    #[serde(default)]
    pub failed_tasks: Vec<TaskId>,
}

impl WorkerRecord {
    /// A freshly registered worker
    pub fn new(worker_id: u64, host: impl Into<String>) -> Self {
        Self {
            worker_id,
            host: host.into(),
            status: WorkerStatus::Running,
            started_time: Some(Utc::now()),
            finished_time: None,
            current_task_id: None,
            error: None,
            success_tasks: Vec::new(),
            failed_tasks: Vec::new(),
        }
    }

    /// Mark the worker finished at `now`
    pub fn finish(&mut self) {
        self.status = WorkerStatus::Finished;
        self.current_task_id = None;
        self.finished_time = Some(Utc::now());
    }
}
