//! Per-invocation context handed to task functions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context as _};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::types::TaskId;

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag shared between the executor and a task
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Named arguments and cancellation state for one task execution
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    params: Map<String, Value>,
    cancel: CancelFlag,
}

impl TaskContext {
    pub fn new(task_id: TaskId, params: Map<String, Value>, cancel: CancelFlag) -> Self {
        Self {
            task_id,
            params,
            cancel,
        }
    }

    /// All named parameters
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Bind a required named argument
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .params
            .get(name)
            .ok_or_else(|| anyhow!("missing required argument '{}'", name))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("invalid value for argument '{}'", name))
    }

    /// Bind an optional named argument, falling back to `default` when absent
    pub fn arg_or<T: DeserializeOwned>(&self, name: &str, default: T) -> anyhow::Result<T> {
        if self.params.contains_key(name) {
            self.arg(name)
        } else {
            Ok(default)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `duration`, waking early with an error if cancelled
    pub fn sleep(&self, duration: Duration) -> anyhow::Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return Err(anyhow!("task {} cancelled", self.task_id));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
