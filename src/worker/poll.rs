//! The worker poll loop
//!
//! Fetches batches of pending tasks and runs them one at a time. The loop
//! ends when `loops_limit` batches have run, `life_timeout` has elapsed, or
//! `StopHandle::stop` was called. Stop conditions are checked between
//! batches only, so an in-flight task always runs to completion or timeout.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BatchReport, StopHandle, WorkerPhase, WorkerSettings, WorkerState};
use crate::config::WorkerOptions;
use crate::error::{Error, Result};
use crate::executor::{build_strategy, ExecutionStrategy, RunnerConfig, TaskRunner};
use crate::loader::TaskRegistry;
use crate::store::{local_host, TaskStore};
use crate::types::{ExecutionResult, FailureKind, ResultStatus, TaskId, TaskRecord};

// ─────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────

/// A task-polling worker
pub struct Worker {
    store: Arc<dyn TaskStore>,
    runner: TaskRunner,
    settings: WorkerSettings,
    state: WorkerState,
    stop: StopHandle,
}

impl Worker {
    /// Create a worker using the strategy named in `settings`
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskRegistry>,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let strategy = build_strategy(settings.execution_strategy, settings.kill_grace)?;
        Ok(Self::with_strategy(store, registry, strategy, settings))
    }

    /// Create a worker with an explicit execution strategy
    pub fn with_strategy(
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskRegistry>,
        strategy: Arc<dyn ExecutionStrategy>,
        settings: WorkerSettings,
    ) -> Self {
        let runner = TaskRunner::new(
            store.clone(),
            registry,
            strategy,
            RunnerConfig {
                timeout: settings.timeout,
                raise_on_error: settings.raise_on_error,
            },
        );
        Self {
            store,
            runner,
            settings,
            state: WorkerState::default(),
            stop: StopHandle::new(),
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    pub fn into_state(self) -> WorkerState {
        self.state
    }

    /// Handle that stops the loop between batches
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run the loop on a tokio task
    pub fn spawn(mut self) -> WorkerHandle {
        let stop = self.stop_handle();
        let join = tokio::spawn(async move {
            self.start().await?;
            Ok(self.into_state())
        });
        WorkerHandle { stop, join }
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Start the worker.
    ///
    /// Blocking workers loop until a stop condition; non-blocking workers run
    /// one batch. Returns an error only for fatal conditions, after they have
    /// been recorded in the store.
    pub async fn start(&mut self) -> Result<()> {
        if !self.settings.enabled {
            info!("Worker disabled, not starting");
            return Ok(());
        }
        if self.state.phase != WorkerPhase::NotStarted {
            return Err(Error::Internal("worker was already started".to_string()));
        }

        self.state.phase = WorkerPhase::Active;
        self.state.started_at = Some(std::time::Instant::now());
        if self.settings.register {
            self.register().await;
        }

        info!(
            worker_id = ?self.state.worker_id(),
            strategy = %self.settings.execution_strategy,
            blocking = self.settings.blocking,
            task_limit = self.settings.task_limit,
            loops_limit = ?self.settings.loops_limit,
            life_timeout_secs = ?self.settings.life_timeout.map(|d| d.as_secs_f64()),
            "Worker started"
        );

        let result = if self.settings.blocking {
            self.run_loop().await
        } else {
            self.run_batch().await.map(|_| ())
        };

        match result {
            Ok(()) => {
                self.finish().await;
                Ok(())
            }
            Err(err) => {
                self.abort(&err).await;
                Err(err)
            }
        }
    }

    async fn register(&mut self) {
        match self.store.register_worker(&local_host()).await {
            Ok(identity) => {
                debug!(worker_id = identity.worker_id, host = %identity.host, "Worker registered");
                self.state.identity = Some(identity);
            }
            Err(e) => {
                warn!(error = %e.format_for_log(), "Worker registration failed, running anonymously");
            }
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        let mut backoff = fetch_backoff(&self.settings);

        loop {
            if self.should_stop() {
                return Ok(());
            }

            let report = self.run_batch().await?;
            let delay = next_delay(&report, &mut backoff, &self.settings);

            if self.should_stop() {
                return Ok(());
            }

            let delay = match self.life_remaining() {
                Some(remaining) => delay.min(remaining),
                None => delay,
            };
            debug!(delay_ms = delay.as_millis() as u64, "Sleeping until next batch");
            if self.stop.sleep(delay).await {
                info!("Stop requested");
                return Ok(());
            }
        }
    }

    /// Check the loop's stop conditions
    fn should_stop(&self) -> bool {
        if self.stop.is_stopped() {
            info!("Stop requested");
            return true;
        }
        if let Some(limit) = self.settings.loops_limit {
            if self.state.loops >= limit {
                info!(loops = self.state.loops, "loops_limit reached");
                return true;
            }
        }
        if let Some(life) = self.settings.life_timeout {
            if self.state.elapsed() >= life {
                info!(elapsed_secs = self.state.elapsed().as_secs_f64(), "life_timeout exceeded");
                return true;
            }
        }
        false
    }

    fn life_remaining(&self) -> Option<Duration> {
        self.settings
            .life_timeout
            .map(|life| life.saturating_sub(self.state.elapsed()))
    }

    async fn finish(&mut self) {
        self.state.phase = WorkerPhase::Finished;
        self.state.current_task = None;
        if let Some(identity) = self.state.identity.as_mut() {
            identity.finish();
            if let Err(e) = self.store.update_worker(identity).await {
                error!(error = %e, "Failed to mark worker finished");
            }
        }
        info!(
            loops = self.state.loops,
            succeeded = self.state.tasks_succeeded,
            failed = self.state.tasks_failed,
            skipped = self.state.tasks_skipped,
            "Worker finished"
        );
    }

    async fn abort(&mut self, err: &Error) {
        self.state.phase = WorkerPhase::Finished;
        self.state.current_task = None;
        error!(error = %err.format_for_log(), "Worker stopped by fatal error");

        // a fatal timeout was already recorded against the worker by the runner
        if matches!(err, Error::FatalTimeout { .. }) {
            return;
        }
        if let Some(identity) = self.state.identity.as_ref() {
            if let Err(e) = self.store.set_worker_error(&err.to_string(), identity, None).await {
                error!(error = %e, "Failed to record worker error");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Batches
    // ─────────────────────────────────────────────────────────────

    /// Fetch and run one batch of tasks
    pub async fn run_batch(&mut self) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let fetched = self
            .store
            .get_new_tasks(self.settings.task_limit, self.state.identity.as_ref())
            .await;
        let tasks = match fetched {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(
                    error = %e.format_for_log(),
                    retryable = e.is_retryable(),
                    "Failed to fetch tasks"
                );
                report.fetch_failed = true;
                report.fetch_retryable = e.is_retryable();
                self.state.loops += 1;
                return Ok(report);
            }
        };

        report.fetched = tasks.len();
        if !tasks.is_empty() {
            info!(count = tasks.len(), "Fetched tasks");
        }

        let processed = self.process(tasks, &mut report).await;
        self.state.loops += 1;
        self.state.tasks_succeeded += report.succeeded as u64;
        self.state.tasks_failed += report.failed as u64;
        self.state.tasks_skipped += report.skipped as u64;

        match processed {
            Ok(()) => {
                self.set_current_task(None).await;
                Ok(report)
            }
            Err(err) => {
                self.state.current_task = None;
                if let Some(identity) = self.state.identity.as_mut() {
                    identity.current_task_id = None;
                }
                Err(err)
            }
        }
    }

    async fn process(&mut self, tasks: Vec<TaskRecord>, report: &mut BatchReport) -> Result<()> {
        let mut pending = tasks.into_iter();
        while let Some(mut task) = pending.next() {
            task.started_time = Some(Utc::now());
            if let Err(e) = self.store.update(&task).await {
                error!(task_id = task.task_id, error = %e, "Failed to mark task started, skipping");
                report.skipped += 1;
                continue;
            }
            self.set_current_task(Some(task.task_id)).await;

            let outcome = match self.runner.run_one(&task, self.state.identity.as_ref()).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // the runner records the failing task before propagating
                    report.failed += 1;
                    self.release_claimed(pending, &err, report).await;
                    return Err(err);
                }
            };
            match outcome.status {
                ResultStatus::Done => report.succeeded += 1,
                ResultStatus::Error => report.failed += 1,
            }
        }
        Ok(())
    }

    /// Record tasks claimed by an aborted batch as errors so none stays running
    async fn release_claimed(
        &self,
        tasks: impl Iterator<Item = TaskRecord>,
        cause: &Error,
        report: &mut BatchReport,
    ) {
        for task in tasks {
            let result = ExecutionResult::error(
                FailureKind::Execution,
                format!("worker aborted before task ran: {}", cause),
            );
            match self
                .store
                .update_worker_task(&result, &task, self.state.identity.as_ref())
                .await
            {
                Ok(()) => {
                    warn!(task_id = task.task_id, "Claimed task released after worker abort");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(task_id = task.task_id, error = %e, "Failed to release claimed task");
                    report.skipped += 1;
                }
            }
        }
    }

    async fn set_current_task(&mut self, task_id: Option<TaskId>) {
        self.state.current_task = task_id;
        if let Some(identity) = self.state.identity.as_mut() {
            if identity.current_task_id == task_id {
                return;
            }
            identity.current_task_id = task_id;
            if let Err(e) = self.store.update_worker(identity).await {
                warn!(error = %e, "Failed to update worker current task");
            }
        }
    }
}

/// Backoff between failed fetches, floored at 100ms
fn fetch_backoff(settings: &WorkerSettings) -> ExponentialBackoff {
    let mut backoff = ExponentialBackoff {
        initial_interval: settings.sleep_interval.max(Duration::from_millis(100)),
        max_interval: settings.max_backoff(),
        max_elapsed_time: None,
        ..Default::default()
    };
    backoff.reset();
    backoff
}

/// Delay before the next batch.
///
/// Retryable fetch failures back off exponentially; other fetch failures
/// wait the full backoff ceiling. A successful fetch resets the backoff.
fn next_delay(
    report: &BatchReport,
    backoff: &mut ExponentialBackoff,
    settings: &WorkerSettings,
) -> Duration {
    if !report.fetch_failed {
        backoff.reset();
        return settings.sleep_interval;
    }
    if !report.fetch_retryable {
        return settings.max_backoff();
    }
    backoff.next_backoff().unwrap_or(settings.max_backoff())
}

// ─────────────────────────────────────────────────────────────────
// Worker Handle
// ─────────────────────────────────────────────────────────────────

/// A worker running on a tokio task
pub struct WorkerHandle {
    stop: StopHandle,
    join: JoinHandle<Result<WorkerState>>,
}

impl WorkerHandle {
    /// Ask the worker to stop between batches
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the worker to finish and return its final state
    pub async fn join(self) -> Result<WorkerState> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))?
    }
}

// ─────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────

/// Merge caller options with the persisted record `config_id` and build a worker.
///
/// Caller values win; the persisted record fills gaps; defaults apply last.
pub async fn prepare_worker(
    options: WorkerOptions,
    config_id: Option<&str>,
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRegistry>,
) -> Result<Worker> {
    let config_id = config_id
        .map(str::to_string)
        .or_else(|| options.config_id.clone());

    let persisted = match config_id.as_deref() {
        Some(id) => match store.get_config(id).await {
            Ok(Some(record)) => {
                debug!(config_id = %id, "Merging persisted configuration");
                WorkerOptions::from_record(&record)?
            }
            Ok(None) => {
                warn!(config_id = %id, "Configuration record not found, using caller options");
                WorkerOptions::default()
            }
            Err(e) => {
                error!(config_id = %id, error = %e, "Failed to read configuration record");
                WorkerOptions::default()
            }
        },
        None => WorkerOptions::default(),
    };

    let settings = options.or(persisted).resolve()?;
    Worker::new(store, registry, settings)
}

/// Build and run a worker to completion
pub async fn start_worker(
    options: WorkerOptions,
    config_id: Option<&str>,
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRegistry>,
) -> Result<WorkerState> {
    let mut worker = prepare_worker(options, config_id, store, registry).await?;
    worker.start().await?;
    Ok(worker.into_state())
}
