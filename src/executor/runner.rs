//! Task runner
//!
//! Executes exactly one claimed task end to end and records the outcome in
//! the store with a single terminal write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::{ExecutionStrategy, TaskCall};
use crate::error::{Error, Result};
use crate::loader::TaskRegistry;
use crate::store::TaskStore;
use crate::types::{ExecutionResult, FailureKind, ResultStatus, TaskId, TaskRecord, WorkerRecord};

// ─────────────────────────────────────────────────────────────────
// Runner Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the task runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Per-task execution timeout
    pub timeout: Duration,

    /// Propagate task failures after recording them
    pub raise_on_error: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            raise_on_error: false,
        }
    }
}

/// Summary of one processed task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub status: ResultStatus,
    pub failure: Option<FailureKind>,
    /// Whether the store accepted the terminal write
    pub recorded: bool,
    pub elapsed: Duration,
}

// ─────────────────────────────────────────────────────────────────
// Task Runner
// ─────────────────────────────────────────────────────────────────

/// Runs claimed tasks through an execution strategy
pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRegistry>,
    strategy: Arc<dyn ExecutionStrategy>,
    config: RunnerConfig,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskRegistry>,
        strategy: Arc<dyn ExecutionStrategy>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            strategy,
            config,
        }
    }

    pub fn strategy(&self) -> &dyn ExecutionStrategy {
        self.strategy.as_ref()
    }

    /// Run one claimed task and record its outcome.
    ///
    /// Returns `Err` only for a fatal timeout, or for a failed task when
    /// `raise_on_error` is set. In both cases the store has been written first.
    pub async fn run_one(
        &self,
        task: &TaskRecord,
        worker: Option<&WorkerRecord>,
    ) -> Result<TaskOutcome> {
        let started = Instant::now();
        let task_id = task.task_id;
        info!(
            task_id,
            target = %task.target(),
            strategy = %self.strategy.kind(),
            "Starting task execution"
        );

        let (result, step_error) = match self.attempt(task).await {
            Ok(result) => (result, None),
            Err(err @ Error::FatalTimeout { .. }) => {
                self.record_fatal(&err, task, worker).await;
                return Err(err);
            }
            Err(err) => {
                let result = ExecutionResult::error(FailureKind::Execution, err.format_for_log());
                (result, Some(err))
            }
        };

        let recorded = match self.store.update_worker_task(&result, task, worker).await {
            Ok(()) => true,
            Err(e) => {
                error!(task_id, error = %e, "Failed to record task outcome");
                false
            }
        };

        let elapsed = started.elapsed();
        match result.error_message() {
            None => info!(
                task_id,
                execution_time_ms = elapsed.as_millis() as u64,
                "Task completed successfully"
            ),
            Some(ref message) => warn!(
                task_id,
                execution_time_ms = elapsed.as_millis() as u64,
                failure = ?result.failure,
                error = %message,
                "Task failed"
            ),
        }

        if self.config.raise_on_error {
            if let Some(err) = step_error {
                return Err(Error::execution_failed(Some(task_id), err.to_string()));
            }
            if result.failure == Some(FailureKind::Execution) {
                let message = result.error_message().unwrap_or_default();
                return Err(Error::execution_failed(Some(task_id), message));
            }
        }

        Ok(TaskOutcome {
            task_id,
            status: result.status,
            failure: result.failure,
            recorded,
            elapsed,
        })
    }

    /// Resolve and execute the task without touching its final state
    async fn attempt(&self, task: &TaskRecord) -> Result<ExecutionResult> {
        let payload = self.store.task_payload(task).await?;

        let Some(function) = self.registry.resolve_function(&payload.module, &payload.func) else {
            let message = if self.registry.contains(&payload.module) {
                Error::FunctionNotFound {
                    module: payload.module.clone(),
                    func: payload.func.clone(),
                }
                .to_string()
            } else {
                format!(
                    "{} (requested {}.{})",
                    Error::ModuleNotFound {
                        module: payload.module.clone()
                    },
                    payload.module,
                    payload.func
                )
            };
            return Ok(ExecutionResult::error(FailureKind::Resolution, message));
        };

        let call = TaskCall {
            task_id: task.task_id,
            module: payload.module,
            func: payload.func,
            params: payload.params,
            function,
        };
        self.strategy.execute(&call, self.config.timeout).await
    }

    /// Best-effort record of a fatal condition before the worker aborts
    async fn record_fatal(&self, err: &Error, task: &TaskRecord, worker: Option<&WorkerRecord>) {
        let message = err.to_string();
        error!(task_id = task.task_id, error = %message, "Fatal task failure");
        let written = match worker {
            Some(worker) => self.store.set_worker_error(&message, worker, Some(task)).await,
            None => {
                let result = ExecutionResult::error(FailureKind::Timeout, message.clone());
                self.store.update_worker_task(&result, task, None).await
            }
        };
        if let Err(e) = written {
            error!(task_id = task.task_id, error = %e, "Failed to record fatal error");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{InlineStrategy, ThreadStrategy};
    use crate::loader::{builtin, TEST_TASKS};
    use crate::store::MemoryStore;
    use crate::types::{NewTask, TaskStatus, WorkerStatus};
    use serde_json::{json, Value};

    async fn claimed(store: &MemoryStore, module: &str, func: &str, params: Value) -> TaskRecord {
        store.add_task(NewTask::new(module, func, params)).await.unwrap();
        store.get_new_tasks(1, None).await.unwrap().remove(0)
    }

    fn runner(store: Arc<MemoryStore>, config: RunnerConfig) -> TaskRunner {
        TaskRunner::new(store, Arc::new(builtin()), Arc::new(InlineStrategy), config)
    }

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert!(!config.raise_on_error);
    }

    #[tokio::test]
    async fn test_run_one_success() {
        let store = Arc::new(MemoryStore::new());
        let task = claimed(&store, TEST_TASKS, "double", json!("{\"x\": 2}")).await;
        let outcome = runner(store.clone(), RunnerConfig::default())
            .run_one(&task, None)
            .await
            .unwrap();
        assert_eq!(outcome.status, ResultStatus::Done);
        assert!(outcome.recorded);

        let stored = store.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Done);
        assert_eq!(stored.result, Some(json!(4)));
        assert!(stored.finished_time.is_some());
    }

    #[tokio::test]
    async fn test_missing_module_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let task = claimed(&store, "missing_mod", "f", json!({})).await;
        let outcome = runner(store.clone(), RunnerConfig::default())
            .run_one(&task, None)
            .await
            .unwrap();
        assert_eq!(outcome.failure, Some(FailureKind::Resolution));

        let stored = store.get_task(task.task_id).await.unwrap().unwrap();
        let error = stored.error.unwrap();
        assert!(error.contains("missing_mod"));
        assert!(error.contains("not found"));
        assert!(error.contains("f"));
    }

    #[tokio::test]
    async fn test_missing_function_names_both() {
        let store = Arc::new(MemoryStore::new());
        let task = claimed(&store, TEST_TASKS, "no_such_func", json!({})).await;
        runner(store.clone(), RunnerConfig::default())
            .run_one(&task, None)
            .await
            .unwrap();
        let error = store.get_task(task.task_id).await.unwrap().unwrap().error.unwrap();
        assert!(error.contains(TEST_TASKS));
        assert!(error.contains("no_such_func"));
    }

    #[tokio::test]
    async fn test_strict_mode_records_then_propagates() {
        let store = Arc::new(MemoryStore::new());
        let task = claimed(&store, TEST_TASKS, "raise_exception", json!({"message": "bad input"})).await;
        let config = RunnerConfig {
            raise_on_error: true,
            ..Default::default()
        };
        let err = runner(store.clone(), config).run_one(&task, None).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed { task_id: Some(_), .. }));
        assert!(err.to_string().contains("bad input"));

        let stored = store.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_strict_mode_ignores_resolution_failures() {
        let store = Arc::new(MemoryStore::new());
        let task = claimed(&store, "missing_mod", "f", json!({})).await;
        let config = RunnerConfig {
            raise_on_error: true,
            ..Default::default()
        };
        assert!(runner(store, config).run_one(&task, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_fatal_timeout_marks_worker() {
        let store = Arc::new(MemoryStore::new());
        let worker = store.register_worker("host").await.unwrap();
        store
            .add_task(NewTask::new(TEST_TASKS, "spin", json!({"secs": 1.0})))
            .await
            .unwrap();
        let task = store.get_new_tasks(1, Some(&worker)).await.unwrap().remove(0);

        let runner = TaskRunner::new(
            store.clone(),
            Arc::new(builtin()),
            Arc::new(ThreadStrategy::isolated()),
            RunnerConfig {
                timeout: Duration::from_millis(50),
                raise_on_error: false,
            },
        );
        let err = runner.run_one(&task, Some(&worker)).await.unwrap_err();
        assert!(err.is_fatal());

        let stored_worker = store.get_worker(worker.worker_id).await.unwrap().unwrap();
        assert_eq!(stored_worker.status, WorkerStatus::Error);
        assert!(stored_worker.error.unwrap().contains("unresponsive"));
        let stored_task = store.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored_task.status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_is_reported() {
        let store = Arc::new(MemoryStore::new());
        // never claimed, so the terminal write is refused
        let task = store
            .add_task(NewTask::new(TEST_TASKS, "return_none", json!({})))
            .await
            .unwrap();
        let outcome = runner(store, RunnerConfig::default())
            .run_one(&task, None)
            .await
            .unwrap();
        assert!(!outcome.recorded);
    }
}
