//! Resolved poll loop settings

use std::time::Duration;

use crate::executor::StrategyKind;

/// Poll loop settings with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// If false the loop never starts
    pub enabled: bool,

    /// Run until a stop condition (true) or exactly one batch (false)
    pub blocking: bool,

    pub execution_strategy: StrategyKind,

    /// Pause between batches
    pub sleep_interval: Duration,

    /// Per-task execution timeout
    pub timeout: Duration,

    /// Maximum total runtime of the loop
    pub life_timeout: Option<Duration>,

    /// Maximum number of batches
    pub loops_limit: Option<u64>,

    /// Maximum tasks fetched per batch
    pub task_limit: usize,

    /// Propagate task failures after recording them
    pub raise_on_error: bool,

    /// Register a worker identity in the store
    pub register: bool,

    /// How long a cancelled killable-thread task may take to stop
    pub kill_grace: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            blocking: true,
            execution_strategy: StrategyKind::None,
            sleep_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
            life_timeout: None,
            loops_limit: None,
            task_limit: 20,
            raise_on_error: false,
            register: true,
            kill_grace: Duration::from_millis(500),
        }
    }
}

impl WorkerSettings {
    /// Longest pause after failed fetches
    pub fn max_backoff(&self) -> Duration {
        self.sleep_interval.max(Duration::from_secs(30))
    }
}
