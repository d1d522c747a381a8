//! Store state shared by the in-memory and file-backed stores
//!
//! All lifecycle rules live here so both backends enforce them the same way:
//! claims only take due `pending` tasks, and a terminal write is only
//! accepted for a `running` task held by the writing worker.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{
    ExecutionResult, NewTask, TaskId, TaskRecord, TaskStatus, WorkerRecord, WorkerStatus,
};

/// Snapshot of everything a store holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    next_task_id: TaskId,
    #[serde(default)]
    next_worker_id: u64,
    #[serde(default)]
    tasks: BTreeMap<TaskId, TaskRecord>,
    #[serde(default)]
    workers: BTreeMap<u64, WorkerRecord>,
    #[serde(default)]
    configs: BTreeMap<String, Value>,
}

fn in_project(task: &TaskRecord, project: Option<&str>) -> bool {
    match project {
        Some(project) => task.project.as_deref() == Some(project),
        None => true,
    }
}

impl StoreState {
    // ─────────────────────────────────────────────────────────────
    // Tasks
    // ─────────────────────────────────────────────────────────────

    pub fn add_task(&mut self, new: NewTask, project: Option<&str>) -> TaskRecord {
        self.next_task_id += 1;
        let task = TaskRecord {
            task_id: self.next_task_id,
            module: new.module,
            func: new.func,
            params: new.params,
            project: new.project.or_else(|| project.map(str::to_string)),
            status: new.status.unwrap_or_default(),
            result: None,
            error: None,
            create_time: Some(Utc::now()),
            started_time: None,
            finished_time: None,
            scheduled_time: new.scheduled_time,
            worker_id: None,
            worker_host: None,
        };
        self.tasks.insert(task.task_id, task.clone());
        task
    }

    /// Claim up to `limit` due pending tasks in `task_id` order
    pub fn claim(
        &mut self,
        limit: usize,
        worker: Option<&WorkerRecord>,
        local_host: &str,
        project: Option<&str>,
    ) -> Vec<TaskRecord> {
        let now = Utc::now();
        let mut claimed = Vec::new();
        for task in self.tasks.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if task.status != TaskStatus::Pending || !task.is_due(now) || !in_project(task, project)
            {
                continue;
            }
            task.status = TaskStatus::Running;
            match worker {
                Some(worker) => {
                    task.worker_id = Some(worker.worker_id);
                    task.worker_host = Some(worker.host.clone());
                }
                None => {
                    task.worker_id = None;
                    task.worker_host = Some(local_host.to_string());
                }
            }
            claimed.push(task.clone());
        }
        claimed
    }

    pub fn task(&self, task_id: TaskId) -> Result<&TaskRecord> {
        self.tasks.get(&task_id).ok_or(Error::TaskNotFound { task_id })
    }

    fn task_mut(&mut self, task_id: TaskId) -> Result<&mut TaskRecord> {
        self.tasks.get_mut(&task_id).ok_or(Error::TaskNotFound { task_id })
    }

    pub fn tasks(&self, project: Option<&str>) -> Vec<TaskRecord> {
        self.tasks
            .values()
            .filter(|task| in_project(task, project))
            .cloned()
            .collect()
    }

    /// Persist the started mark of a task
    pub fn mark_started(&mut self, task: &TaskRecord) -> Result<()> {
        let stored = self.task_mut(task.task_id)?;
        if stored.status.is_terminal() {
            return Err(Error::store_conflict(
                task.task_id,
                format!("task is already {}", stored.status),
            ));
        }
        stored.started_time = task.started_time;
        Ok(())
    }

    /// Record the final outcome of a claimed task
    pub fn finish_task(
        &mut self,
        result: &ExecutionResult,
        task: &TaskRecord,
        worker: Option<&WorkerRecord>,
    ) -> Result<()> {
        let task_id = task.task_id;
        if let Some(worker) = worker {
            if !self.workers.contains_key(&worker.worker_id) {
                return Err(Error::WorkerNotFound {
                    worker_id: worker.worker_id,
                });
            }
        }

        let stored = self.task_mut(task_id)?;
        if stored.status != TaskStatus::Running {
            return Err(Error::store_conflict(
                task_id,
                format!("task is {}, not running", stored.status),
            ));
        }
        if let Some(worker) = worker {
            if stored.worker_id != Some(worker.worker_id) {
                return Err(Error::store_conflict(
                    task_id,
                    format!("task is not claimed by worker {}", worker.worker_id),
                ));
            }
        }

        stored.finished_time = Some(Utc::now());
        let failed = match result.error_message() {
            Some(message) => {
                stored.status = TaskStatus::Error;
                stored.error = Some(message);
                stored.result = None;
                true
            }
            None => {
                stored.status = TaskStatus::Done;
                stored.result = Some(result.result.clone());
                stored.error = None;
                false
            }
        };

        if let Some(worker) = worker.and_then(|w| self.workers.get_mut(&w.worker_id)) {
            if failed {
                worker.failed_tasks.push(task_id);
            } else {
                worker.success_tasks.push(task_id);
            }
            worker.current_task_id = None;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Workers
    // ─────────────────────────────────────────────────────────────

    pub fn register_worker(&mut self, host: &str) -> WorkerRecord {
        self.next_worker_id += 1;
        let worker = WorkerRecord::new(self.next_worker_id, host);
        self.workers.insert(worker.worker_id, worker.clone());
        worker
    }

    pub fn worker(&self, worker_id: u64) -> Option<&WorkerRecord> {
        self.workers.get(&worker_id)
    }

    /// Persist the fields the poll loop owns
    pub fn update_worker(&mut self, worker: &WorkerRecord) -> Result<()> {
        let stored = self
            .workers
            .get_mut(&worker.worker_id)
            .ok_or(Error::WorkerNotFound {
                worker_id: worker.worker_id,
            })?;
        stored.current_task_id = worker.current_task_id;
        stored.status = worker.status;
        stored.finished_time = worker.finished_time;
        Ok(())
    }

    /// Mark a worker as failed, and its task too when one is given
    pub fn set_worker_error(
        &mut self,
        error: &str,
        worker: &WorkerRecord,
        task: Option<&TaskRecord>,
    ) -> Result<()> {
        let now = Utc::now();
        if !self.workers.contains_key(&worker.worker_id) {
            return Err(Error::WorkerNotFound {
                worker_id: worker.worker_id,
            });
        }

        let mut failed_task = None;
        if let Some(task) = task {
            let stored = self.task_mut(task.task_id)?;
            // a task that already reached a final state keeps it
            if !stored.status.is_terminal() {
                stored.status = TaskStatus::Error;
                stored.error = Some(error.to_string());
                stored.result = None;
                stored.finished_time = Some(now);
                failed_task = Some(task.task_id);
            }
        }

        if let Some(stored) = self.workers.get_mut(&worker.worker_id) {
            if let Some(task_id) = failed_task {
                stored.failed_tasks.push(task_id);
            }
            stored.status = WorkerStatus::Error;
            stored.error = Some(error.to_string());
            stored.current_task_id = None;
            stored.finished_time = Some(now);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Configuration records
    // ─────────────────────────────────────────────────────────────

    pub fn config(&self, config_id: &str) -> Option<&Value> {
        self.configs.get(config_id)
    }

    pub fn put_config(&mut self, config_id: &str, config: Value) {
        self.configs.insert(config_id.to_string(), config);
    }
}
