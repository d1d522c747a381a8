//! Task record definitions
//!
//! A task names a function by `(module, func)` and carries its named
//! parameters. The store owns the record; the worker only moves it through
//! `pending -> running -> {done | error}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Store-assigned task identifier
pub type TaskId = u64;

// ─────────────────────────────────────────────────────────────────
// Task Status
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed
    #[default]
    #[serde(alias = "new")]
    Pending,
    /// Claimed by a worker
    #[serde(alias = "working")]
    Running,
    /// Finished with a result
    Done,
    /// Finished with an error
    Error,
}

impl TaskStatus {
    /// Position in the lifecycle; transitions may only increase it
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Done | TaskStatus::Error => 2,
        }
    }

    /// Whether the task has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        next.rank() == self.rank() + 1
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Record
// ─────────────────────────────────────────────────────────────────

/// A task as persisted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,

    /// Code location of the function
    pub module: String,

    /// Entry point within the module
    pub func: String,

    /// Named parameters; a mapping or a JSON string encoding one
    #[serde(default)]
    pub params: Value,

    /// Project the task belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default)]
    pub status: TaskStatus,

    /// Return value on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_time: Option<DateTime<Utc>>,

    /// Not claimable before this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,

    /// Worker that claimed the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_host: Option<String>,
}

impl TaskRecord {
    /// Human-readable `module.func` label
    pub fn target(&self) -> String {
        format!("{}.{}", self.module, self.func)
    }

    /// Whether the task may be claimed at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_time.map_or(true, |at| at <= now)
    }
}

/// A task submission; the store assigns the id and timestamps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub module: String,
    pub func: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Initial status, `pending` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl NewTask {
    pub fn new(module: impl Into<String>, func: impl Into<String>, params: Value) -> Self {
        Self {
            module: module.into(),
            func: func.into(),
            params,
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Payload
// ─────────────────────────────────────────────────────────────────

/// What the executor needs to run a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub module: String,
    pub func: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TaskPayload {
    /// Build the payload for a task, decoding its parameters
    pub fn from_record(task: &TaskRecord) -> Self {
        Self {
            module: task.module.clone(),
            func: task.func.clone(),
            params: Self::decode_params(&task.params),
        }
    }

    /// Decode task parameters into a named-argument mapping.
    ///
    /// A JSON string is parsed first. Anything that is not a mapping after
    /// that (null, arrays, scalars, undecodable text) yields an empty map.
    pub fn decode_params(raw: &Value) -> Map<String, Value> {
        match raw {
            Value::Object(map) => map.clone(),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
