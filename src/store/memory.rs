//! In-memory task store

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{local_host, StoreState, TaskStore};
use crate::error::Result;
use crate::types::{ExecutionResult, NewTask, TaskId, TaskPayload, TaskRecord, WorkerRecord};

/// Task store held entirely in memory
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    project: Option<String>,
    host: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_project(None)
    }

    /// A store that only hands out tasks of `project`
    pub fn with_project(project: Option<String>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            project,
            host: local_host(),
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_new_tasks(
        &self,
        limit: usize,
        worker: Option<&WorkerRecord>,
    ) -> Result<Vec<TaskRecord>> {
        Ok(self
            .state
            .lock()
            .claim(limit, worker, &self.host, self.project.as_deref()))
    }

    async fn task_payload(&self, task: &TaskRecord) -> Result<TaskPayload> {
        let state = self.state.lock();
        Ok(TaskPayload::from_record(state.task(task.task_id)?))
    }

    async fn update(&self, task: &TaskRecord) -> Result<()> {
        self.state.lock().mark_started(task)
    }

    async fn update_worker_task(
        &self,
        result: &ExecutionResult,
        task: &TaskRecord,
        worker: Option<&WorkerRecord>,
    ) -> Result<()> {
        self.state.lock().finish_task(result, task, worker)
    }

    async fn set_worker_error(
        &self,
        error: &str,
        worker: &WorkerRecord,
        task: Option<&TaskRecord>,
    ) -> Result<()> {
        self.state.lock().set_worker_error(error, worker, task)
    }

    async fn register_worker(&self, host: &str) -> Result<WorkerRecord> {
        Ok(self.state.lock().register_worker(host))
    }

    async fn update_worker(&self, worker: &WorkerRecord) -> Result<()> {
        self.state.lock().update_worker(worker)
    }

    async fn get_worker(&self, worker_id: u64) -> Result<Option<WorkerRecord>> {
        Ok(self.state.lock().worker(worker_id).cloned())
    }

    async fn get_config(&self, config_id: &str) -> Result<Option<Value>> {
        Ok(self.state.lock().config(config_id).cloned())
    }

    async fn put_config(&self, config_id: &str, config: Value) -> Result<()> {
        self.state.lock().put_config(config_id, config);
        Ok(())
    }

    async fn add_task(&self, task: NewTask) -> Result<TaskRecord> {
        Ok(self.state.lock().add_task(task, self.project.as_deref()))
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.state.lock().task(task_id).ok().cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.state.lock().tasks(self.project.as_deref()))
    }
}
