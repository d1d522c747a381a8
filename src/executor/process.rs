//! Execution in a child process
//!
//! The worker binary re-executes itself with the hidden `exec-task`
//! subcommand. The request travels as one JSON document on the child's
//! stdin and the result comes back as one JSON line on its stdout. The child
//! can always be killed, so a timeout never endangers the worker.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{call_guarded, ExecutionStrategy, StrategyKind, TaskCall};
use crate::error::{Error, Result};
use crate::loader::{CancelFlag, TaskContext, TaskRegistry};
use crate::types::{ExecutionResult, FailureKind, TaskId};

/// Subcommand that turns the worker binary into a task child
pub const CHILD_SUBCOMMAND: &str = "exec-task";

/// What the parent sends to the child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRequest {
    pub task_id: TaskId,
    pub module: String,
    pub func: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl From<&TaskCall> for ChildRequest {
    fn from(call: &TaskCall) -> Self {
        Self {
            task_id: call.task_id,
            module: call.module.clone(),
            func: call.func.clone(),
            params: call.params.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Parent Side
// ─────────────────────────────────────────────────────────────────

/// Runs each task in a fresh child process
#[derive(Debug, Clone)]
pub struct ProcessStrategy {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessStrategy {
    /// Strategy launching `program args...` for every task
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Strategy re-executing the running binary
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| Error::ChildFailed {
            message: format!("cannot locate the worker executable: {}", e),
        })?;
        Ok(Self::new(program, vec![CHILD_SUBCOMMAND.to_string()]))
    }

    fn interpret(task_id: TaskId, status: ExitStatus, stdout: &[u8]) -> ExecutionResult {
        if !status.success() {
            return ExecutionResult::error(
                FailureKind::ChildExit,
                format!("Task {} child process failed: {}", task_id, status),
            );
        }

        let text = String::from_utf8_lossy(stdout);
        let Some(line) = text.lines().rev().find(|l| !l.trim().is_empty()) else {
            return ExecutionResult::error(
                FailureKind::EmptyResult,
                Error::EmptyResult { task_id }.to_string(),
            );
        };
        match serde_json::from_str(line) {
            Ok(result) => result,
            Err(e) => ExecutionResult::error(
                FailureKind::ChildExit,
                format!("Task {} child process returned an unreadable result: {}", task_id, e),
            ),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for ProcessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::IsolatedProcess
    }

    async fn execute(&self, call: &TaskCall, timeout: Duration) -> Result<ExecutionResult> {
        let task_id = call.task_id;
        let request = serde_json::to_vec(&ChildRequest::from(call))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ChildFailed {
                message: format!("failed to start {}: {}", self.program.display(), e),
            })?;
        debug!(task_id, pid = ?child.id(), "Started task child process");

        let mut stdin = child.stdin.take();
        let mut stdout = child.stdout.take();

        let outcome = tokio::time::timeout(timeout, async {
            if let Some(mut pipe) = stdin.take() {
                if let Err(e) = pipe.write_all(&request).await {
                    warn!(task_id, error = %e, "Could not send request to task child");
                }
                // dropping the pipe closes the child's stdin
            }
            let mut buf = Vec::new();
            if let Some(pipe) = stdout.as_mut() {
                pipe.read_to_end(&mut buf).await?;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, buf))
        })
        .await;

        match outcome {
            Ok(Ok((status, buf))) => Ok(Self::interpret(task_id, status, &buf)),
            Ok(Err(e)) => Err(Error::ChildFailed {
                message: format!("task {} child process I/O failed: {}", task_id, e),
            }),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(task_id, error = %e, "Failed to kill task child process");
                }
                let timeout_secs = timeout.as_secs_f64();
                warn!(task_id, timeout_secs, "Task child process killed after timeout");
                Ok(ExecutionResult::error(
                    FailureKind::Timeout,
                    format!(
                        "Task {} terminated: exceeded timeout of {}s",
                        task_id, timeout_secs
                    ),
                ))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Child Side
// ─────────────────────────────────────────────────────────────────

/// Serve one request in a child process: read it from `input`, run the
/// task and write the result line to `output`.
pub fn serve_child_request(
    registry: &TaskRegistry,
    mut input: impl Read,
    mut output: impl Write,
) -> Result<()> {
    let mut raw = String::new();
    input.read_to_string(&mut raw)?;
    let request: ChildRequest = serde_json::from_str(&raw)?;

    let result = match registry.resolve_function(&request.module, &request.func) {
        Some(function) => {
            let ctx = TaskContext::new(request.task_id, request.params, CancelFlag::new());
            call_guarded(function, &ctx, &request.module, &request.func)
        }
        None => ExecutionResult::error(
            FailureKind::Resolution,
            format!(
                "Function '{}' not found in module '{}'",
                request.func, request.module
            ),
        ),
    };

    serde_json::to_writer(&mut output, &result)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}
