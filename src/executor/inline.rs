//! In-process execution on the calling thread

use std::time::Duration;

use async_trait::async_trait;

use super::{call_guarded, ExecutionStrategy, StrategyKind, TaskCall};
use crate::error::Result;
use crate::loader::{CancelFlag, TaskContext};
use crate::types::ExecutionResult;

/// Runs the task directly; the timeout is not enforced
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineStrategy;

#[async_trait]
impl ExecutionStrategy for InlineStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::None
    }

    async fn execute(&self, call: &TaskCall, _timeout: Duration) -> Result<ExecutionResult> {
        let ctx = TaskContext::new(call.task_id, call.params.clone(), CancelFlag::new());
        Ok(call_guarded(call.function, &ctx, &call.module, &call.func))
    }
}
