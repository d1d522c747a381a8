//! File-backed task store
//!
//! The whole store is one JSON document. Every operation re-reads it, and
//! every mutation writes a new snapshot to a temporary file that is then
//! renamed over the old one. Processes may share the file as long as only
//! one mutates it at a time.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{local_host, StoreState, TaskStore};
use crate::error::{Error, Result};
use crate::types::{ExecutionResult, NewTask, TaskId, TaskPayload, TaskRecord, WorkerRecord};

/// Task store persisted as a JSON file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    project: Option<String>,
    host: String,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>, project: Option<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let store = Self {
            path,
            project,
            host: local_host(),
            lock: Mutex::new(()),
        };
        if !store.path.exists() {
            store.save(&StoreState::default())?;
        } else {
            // fail early on a corrupted file
            store.load()?;
        }
        debug!(path = %store.path.display(), "Opened file store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreState::default()),
            Err(e) => {
                return Err(Error::IoRead {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(StoreState::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            Error::store_unavailable(format!(
                "store file {} is corrupted: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, state: &StoreState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| Error::IoWrite {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::IoWrite {
            path: self.path.clone(),
            source: e,
        })
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock();
        f(&self.load()?)
    }

    /// Apply `f` to a fresh copy of the state and persist it if `f` succeeds
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock();
        let mut state = self.load()?;
        let out = f(&mut state)?;
        self.save(&state)?;
        Ok(out)
    }
}

#[async_trait]
impl TaskStore for FileStore {
    async fn get_new_tasks(
        &self,
        limit: usize,
        worker: Option<&WorkerRecord>,
    ) -> Result<Vec<TaskRecord>> {
        self.mutate(|state| Ok(state.claim(limit, worker, &self.host, self.project.as_deref())))
    }

    async fn task_payload(&self, task: &TaskRecord) -> Result<TaskPayload> {
        self.read(|state| Ok(TaskPayload::from_record(state.task(task.task_id)?)))
    }

    async fn update(&self, task: &TaskRecord) -> Result<()> {
        self.mutate(|state| state.mark_started(task))
    }

    async fn update_worker_task(
        &self,
        result: &ExecutionResult,
        task: &TaskRecord,
        worker: Option<&WorkerRecord>,
    ) -> Result<()> {
        self.mutate(|state| state.finish_task(result, task, worker))
    }

    async fn set_worker_error(
        &self,
        error: &str,
        worker: &WorkerRecord,
        task: Option<&TaskRecord>,
    ) -> Result<()> {
        self.mutate(|state| state.set_worker_error(error, worker, task))
    }

    async fn register_worker(&self, host: &str) -> Result<WorkerRecord> {
        self.mutate(|state| Ok(state.register_worker(host)))
    }

    async fn update_worker(&self, worker: &WorkerRecord) -> Result<()> {
        self.mutate(|state| state.update_worker(worker))
    }

    async fn get_worker(&self, worker_id: u64) -> Result<Option<WorkerRecord>> {
        self.read(|state| Ok(state.worker(worker_id).cloned()))
    }

    async fn get_config(&self, config_id: &str) -> Result<Option<Value>> {
        self.read(|state| Ok(state.config(config_id).cloned()))
    }

    async fn put_config(&self, config_id: &str, config: Value) -> Result<()> {
        self.mutate(|state| {
            state.put_config(config_id, config);
            Ok(())
        })
    }

    async fn add_task(&self, task: NewTask) -> Result<TaskRecord> {
        self.mutate(|state| Ok(state.add_task(task, self.project.as_deref())))
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>> {
        self.read(|state| Ok(state.task(task_id).ok().cloned()))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.read(|state| Ok(state.tasks(self.project.as_deref())))
    }
}
