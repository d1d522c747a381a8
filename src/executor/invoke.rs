//! Guarded invocation of a task function

use std::any::Any;
use std::backtrace::BacktraceStatus;
use std::panic::{self, AssertUnwindSafe};

use crate::loader::{TaskContext, TaskFn};
use crate::types::{ExecutionResult, FailureKind};

/// Run `function` and turn its return, error or panic into a result
pub fn call_guarded(function: TaskFn, ctx: &TaskContext, module: &str, func: &str) -> ExecutionResult {
    match panic::catch_unwind(AssertUnwindSafe(|| function(ctx))) {
        Ok(Ok(value)) => ExecutionResult::done(value),
        Ok(Err(e)) => {
            let mut message = format!("Exception in {}.{}(): {:#}", module, func, e);
            let backtrace = e.backtrace();
            if backtrace.status() == BacktraceStatus::Captured {
                message.push_str("\nTraceback:\n");
                message.push_str(&backtrace.to_string());
            }
            ExecutionResult::error(FailureKind::Execution, message)
        }
        Err(payload) => ExecutionResult::error(
            FailureKind::Execution,
            format!("Panic in {}.{}(): {}", module, func, panic_message(payload.as_ref())),
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
