//! Task store
//!
//! The store is the only shared mutable resource of the worker. Every call
//! is treated as one atomic operation; the worker does no locking of its own.
//!
//! - `TaskStore` trait consumed by the runner and the poll loop
//! - `MemoryStore` for tests and embedding
//! - `FileStore` persisting a JSON snapshot for the CLI

mod file;
mod memory;
mod state;

pub use file::*;
pub use memory::*;
pub use state::*;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{DatabaseSettings, StoreBackend};
use crate::error::Result;
use crate::types::{ExecutionResult, NewTask, TaskId, TaskPayload, TaskRecord, WorkerRecord};

/// Operations the worker needs from a task store
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Claim up to `limit` pending tasks, in store order
    async fn get_new_tasks(
        &self,
        limit: usize,
        worker: Option<&WorkerRecord>,
    ) -> Result<Vec<TaskRecord>>;

    /// Module, function and decoded parameters of a claimed task
    async fn task_payload(&self, task: &TaskRecord) -> Result<TaskPayload>;

    /// Persist the started mark of a task
    async fn update(&self, task: &TaskRecord) -> Result<()>;

    /// Record the terminal outcome of a task claimed by `worker`
    async fn update_worker_task(
        &self,
        result: &ExecutionResult,
        task: &TaskRecord,
        worker: Option<&WorkerRecord>,
    ) -> Result<()>;

    /// Record a fatal error against a worker and, if given, its task
    async fn set_worker_error(
        &self,
        error: &str,
        worker: &WorkerRecord,
        task: Option<&TaskRecord>,
    ) -> Result<()>;

    /// Register a new worker identity
    async fn register_worker(&self, host: &str) -> Result<WorkerRecord>;

    /// Persist current task, status and finished time of a worker
    async fn update_worker(&self, worker: &WorkerRecord) -> Result<()>;

    async fn get_worker(&self, worker_id: u64) -> Result<Option<WorkerRecord>>;

    /// Persisted configuration record
    async fn get_config(&self, config_id: &str) -> Result<Option<Value>>;

    async fn put_config(&self, config_id: &str, config: Value) -> Result<()>;

    async fn add_task(&self, task: NewTask) -> Result<TaskRecord>;

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>>;

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>>;
}

/// Open the store described by the `[database]` settings
pub fn open_store(settings: &DatabaseSettings) -> Result<Arc<dyn TaskStore>> {
    let store: Arc<dyn TaskStore> = match settings.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::with_project(settings.project.clone())),
        StoreBackend::File => Arc::new(FileStore::open(&settings.path, settings.project.clone())?),
    };
    Ok(store)
}

/// Host name recorded on tasks claimed without a worker identity
pub fn local_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
