//! Common test utilities and fixtures
//!
//! Store wrappers that count or inject failures, plus a scratch
//! environment for driving the binary.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

use taskq_worker::error::{Error, Result};
use taskq_worker::store::{MemoryStore, TaskStore};
use taskq_worker::types::{
    ExecutionResult, NewTask, TaskId, TaskPayload, TaskRecord, TaskStatus, WorkerRecord,
};
use taskq_worker::worker::WorkerSettings;

// ─────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────

/// Fast loop settings for tests
pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        sleep_interval: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

// ─────────────────────────────────────────────────────────────────
// Recording Store
// ─────────────────────────────────────────────────────────────────

/// Wraps a `MemoryStore`, counts terminal writes per task and records every
/// status a task was observed in
pub struct RecordingStore {
    pub inner: MemoryStore,
    terminal_writes: Mutex<BTreeMap<TaskId, usize>>,
    transitions: Mutex<BTreeMap<TaskId, Vec<TaskStatus>>>,
    fetches: AtomicUsize,
    fail_fetches: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            terminal_writes: Mutex::new(BTreeMap::new()),
            transitions: Mutex::new(BTreeMap::new()),
            fetches: AtomicUsize::new(0),
            fail_fetches: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` fetches fail
    pub fn fail_next_fetches(&self, n: usize) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn terminal_writes(&self, task_id: TaskId) -> usize {
        self.terminal_writes.lock().get(&task_id).copied().unwrap_or(0)
    }

    pub fn transitions(&self, task_id: TaskId) -> Vec<TaskStatus> {
        self.transitions.lock().get(&task_id).cloned().unwrap_or_default()
    }

    pub async fn submit(&self, module: &str, func: &str, params: Value) -> TaskId {
        let record = self.inner.add_task(NewTask::new(module, func, params)).await.unwrap();
        self.observe(&record);
        record.task_id
    }

    pub async fn task(&self, task_id: TaskId) -> TaskRecord {
        self.inner.get_task(task_id).await.unwrap().unwrap()
    }

    fn observe(&self, task: &TaskRecord) {
        let mut transitions = self.transitions.lock();
        let seen = transitions.entry(task.task_id).or_default();
        if seen.last() != Some(&task.status) {
            seen.push(task.status);
        }
    }

    async fn observe_id(&self, task_id: TaskId) {
        if let Ok(Some(task)) = self.inner.get_task(task_id).await {
            self.observe(&task);
        }
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn get_new_tasks(
        &self,
        limit: usize,
        worker: Option<&WorkerRecord>,
    ) -> Result<Vec<TaskRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::store_unavailable("injected fetch failure"));
        }
        let tasks = self.inner.get_new_tasks(limit, worker).await?;
        for task in &tasks {
            self.observe(task);
        }
        Ok(tasks)
    }

    async fn task_payload(&self, task: &TaskRecord) -> Result<TaskPayload> {
        self.inner.task_payload(task).await
    }

    async fn update(&self, task: &TaskRecord) -> Result<()> {
        self.inner.update(task).await
    }

    async fn update_worker_task(
        &self,
        result: &ExecutionResult,
        task: &TaskRecord,
        worker: Option<&WorkerRecord>,
    ) -> Result<()> {
        *self.terminal_writes.lock().entry(task.task_id).or_default() += 1;
        let written = self.inner.update_worker_task(result, task, worker).await;
        self.observe_id(task.task_id).await;
        written
    }

    async fn set_worker_error(
        &self,
        error: &str,
        worker: &WorkerRecord,
        task: Option<&TaskRecord>,
    ) -> Result<()> {
        if let Some(task) = task {
            *self.terminal_writes.lock().entry(task.task_id).or_default() += 1;
        }
        let written = self.inner.set_worker_error(error, worker, task).await;
        if let Some(task) = task {
            self.observe_id(task.task_id).await;
        }
        written
    }

    async fn register_worker(&self, host: &str) -> Result<WorkerRecord> {
        self.inner.register_worker(host).await
    }

    async fn update_worker(&self, worker: &WorkerRecord) -> Result<()> {
        self.inner.update_worker(worker).await
    }

    async fn get_worker(&self, worker_id: u64) -> Result<Option<WorkerRecord>> {
        self.inner.get_worker(worker_id).await
    }

    async fn get_config(&self, config_id: &str) -> Result<Option<Value>> {
        self.inner.get_config(config_id).await
    }

    async fn put_config(&self, config_id: &str, config: Value) -> Result<()> {
        self.inner.put_config(config_id, config).await
    }

    async fn add_task(&self, task: NewTask) -> Result<TaskRecord> {
        let record = self.inner.add_task(task).await?;
        self.observe(&record);
        Ok(record)
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>> {
        self.inner.get_task(task_id).await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.inner.list_tasks().await
    }
}

// ─────────────────────────────────────────────────────────────────
// CLI Environment
// ─────────────────────────────────────────────────────────────────

/// Scratch directory with a config file pointing at a private store
pub struct CliEnvironment {
    pub root: TempDir,
    pub config_path: PathBuf,
    pub store_path: PathBuf,
}

impl CliEnvironment {
    pub fn new() -> Self {
        Self::with_worker_section("loops_limit = 1\nsleep_interval = 0.01\n")
    }

    pub fn with_worker_section(worker: &str) -> Self {
        let root = TempDir::new().expect("Failed to create temp directory");
        let config_path = root.path().join("taskq-worker.toml");
        let store_path = root.path().join("store").join("tasks.json");
        let config = format!(
            "[database]\nbackend = \"file\"\npath = \"{}\"\n\n[worker]\n{}\n[logging]\nlevel = \"warn\"\n",
            store_path.display(),
            worker
        );
        std::fs::write(&config_path, config).expect("Failed to write config");
        Self {
            root,
            config_path,
            store_path,
        }
    }

    pub fn config(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    /// Command for the worker binary, isolated from the user's environment
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("taskq-worker").unwrap();
        cmd.current_dir(self.root.path())
            .env("HOME", self.root.path())
            .env_remove("RUST_LOG")
            .env_remove("TASKQ_CONFIG")
            .env_remove("TASKQ_DATABASE_PATH");
        cmd
    }
}
