//! Task execution
//!
//! Runs one resolved task function under a configurable strategy:
//! - `none`: directly on the calling thread
//! - `isolated-process`: in a child process that is killed on timeout
//! - `isolated-thread`: on a thread; an overrun aborts the worker
//! - `killable-thread`: on a thread that is cancelled on timeout
//!
//! The runner ties a strategy to the store and records each outcome.

mod inline;
mod invoke;
mod process;
mod runner;
mod thread;

pub use inline::*;
pub use invoke::*;
pub use process::*;
pub use runner::*;
pub use thread::*;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::loader::TaskFn;
use crate::types::{ExecutionResult, TaskId};

// ─────────────────────────────────────────────────────────────────
// Strategy Selection
// ─────────────────────────────────────────────────────────────────

/// How each task is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// In-process, no timeout
    #[default]
    None,
    /// Child process, killed on timeout
    #[serde(alias = "process")]
    IsolatedProcess,
    /// Thread; a timeout is fatal to the worker
    #[serde(alias = "thread")]
    IsolatedThread,
    /// Thread cancelled on timeout
    KillableThread,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::None,
        StrategyKind::IsolatedProcess,
        StrategyKind::IsolatedThread,
        StrategyKind::KillableThread,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::None => "none",
            StrategyKind::IsolatedProcess => "isolated-process",
            StrategyKind::IsolatedThread => "isolated-thread",
            StrategyKind::KillableThread => "killable-thread",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(StrategyKind::None),
            "isolated-process" | "process" => Ok(StrategyKind::IsolatedProcess),
            "isolated-thread" | "thread" => Ok(StrategyKind::IsolatedThread),
            "killable-thread" => Ok(StrategyKind::KillableThread),
            other => Err(Error::config_field_invalid(
                "worker.execution_strategy",
                format!("unknown execution strategy '{}'", other),
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Strategy Trait
// ─────────────────────────────────────────────────────────────────

/// A resolved task ready to run
#[derive(Debug, Clone)]
pub struct TaskCall {
    pub task_id: TaskId,
    pub module: String,
    pub func: String,
    pub params: Map<String, Value>,
    pub function: TaskFn,
}

/// Runs a task call with an upper bound on its execution time.
///
/// Task failures are reported as error results. An `Err` is reserved for
/// conditions the strategy itself could not handle.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(&self, call: &TaskCall, timeout: Duration) -> Result<ExecutionResult>;
}

/// Build the strategy for `kind`
pub fn build_strategy(kind: StrategyKind, kill_grace: Duration) -> Result<Arc<dyn ExecutionStrategy>> {
    let strategy: Arc<dyn ExecutionStrategy> = match kind {
        StrategyKind::None => Arc::new(InlineStrategy),
        StrategyKind::IsolatedProcess => Arc::new(ProcessStrategy::current_exe()?),
        StrategyKind::IsolatedThread => Arc::new(ThreadStrategy::isolated()),
        StrategyKind::KillableThread => Arc::new(ThreadStrategy::killable(kill_grace)),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        assert_eq!("isolated-process".parse::<StrategyKind>().unwrap(), StrategyKind::IsolatedProcess);
        assert_eq!("Thread".parse::<StrategyKind>().unwrap(), StrategyKind::IsolatedThread);
        assert_eq!("".parse::<StrategyKind>().unwrap(), StrategyKind::None);
        assert!("green-thread".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_strategy_serde() {
        let kind: StrategyKind = serde_json::from_str("\"killable-thread\"").unwrap();
        assert_eq!(kind, StrategyKind::KillableThread);
        let kind: StrategyKind = serde_json::from_str("\"process\"").unwrap();
        assert_eq!(kind, StrategyKind::IsolatedProcess);
        assert_eq!(serde_json::to_string(&StrategyKind::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_build_strategy_kinds() {
        for kind in [
            StrategyKind::None,
            StrategyKind::IsolatedProcess,
            StrategyKind::IsolatedThread,
            StrategyKind::KillableThread,
        ] {
            let strategy = build_strategy(kind, Duration::from_millis(10)).unwrap();
            assert_eq!(strategy.kind(), kind);
        }
    }
}
