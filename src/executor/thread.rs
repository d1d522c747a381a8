//! Execution on a dedicated thread
//!
//! A running thread cannot be killed safely. On timeout the task's
//! cancellation flag is raised; a plain isolated thread is then treated as
//! unrecoverable and the worker aborts. The killable variant waits a short
//! grace period for the task to observe cancellation and only aborts the
//! worker if the thread is still busy afterwards.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{call_guarded, ExecutionStrategy, StrategyKind, TaskCall};
use crate::error::{Error, Result};
use crate::loader::{CancelFlag, TaskContext};
use crate::types::{ExecutionResult, FailureKind};

/// Runs each task on its own thread with a timeout
#[derive(Debug, Clone)]
pub struct ThreadStrategy {
    killable: bool,
    grace: Duration,
}

impl ThreadStrategy {
    /// Strategy that aborts the worker when a task overruns
    pub fn isolated() -> Self {
        Self {
            killable: false,
            grace: Duration::ZERO,
        }
    }

    /// Strategy that cancels an overrunning task and waits `grace` for it to stop
    pub fn killable(grace: Duration) -> Self {
        Self {
            killable: true,
            grace,
        }
    }
}

#[async_trait]
impl ExecutionStrategy for ThreadStrategy {
    fn kind(&self) -> StrategyKind {
        if self.killable {
            StrategyKind::KillableThread
        } else {
            StrategyKind::IsolatedThread
        }
    }

    async fn execute(&self, call: &TaskCall, timeout: Duration) -> Result<ExecutionResult> {
        let task_id = call.task_id;
        let cancel = CancelFlag::new();
        let ctx = TaskContext::new(task_id, call.params.clone(), cancel.clone());
        let (tx, mut rx) = oneshot::channel();

        let function = call.function;
        let module = call.module.clone();
        let func = call.func.clone();
        std::thread::Builder::new()
            .name(format!("task-{}", task_id))
            .spawn(move || {
                let result = call_guarded(function, &ctx, &module, &func);
                // the receiver is gone once the task was abandoned
                let _ = tx.send(result);
            })
            .map_err(|e| Error::Internal(format!("failed to spawn task thread: {}", e)))?;

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Ok(ExecutionResult::error(
                FailureKind::EmptyResult,
                Error::EmptyResult { task_id }.to_string(),
            )),
            Err(_) => {
                cancel.cancel();
                let timeout_secs = timeout.as_secs_f64();
                if !self.killable {
                    return Err(Error::FatalTimeout {
                        task_id,
                        timeout_secs,
                    });
                }

                debug!(task_id, grace_ms = self.grace.as_millis() as u64, "Waiting for cancelled task");
                match tokio::time::timeout(self.grace, &mut rx).await {
                    Ok(_) => {
                        warn!(task_id, timeout_secs, "Task thread cancelled after timeout");
                        Ok(ExecutionResult::error(
                            FailureKind::Timeout,
                            format!(
                                "Task {} terminated: exceeded timeout of {}s",
                                task_id, timeout_secs
                            ),
                        ))
                    }
                    Err(_) => Err(Error::FatalTimeout {
                        task_id,
                        timeout_secs,
                    }),
                }
            }
        }
    }
}
