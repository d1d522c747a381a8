//! Execution result definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome status of a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    #[default]
    Done,
    Error,
}

/// Why an execution produced an error result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Module or function could not be resolved
    Resolution,
    /// The task function returned an error or panicked
    Execution,
    /// The task exceeded its timeout and was terminated
    Timeout,
    /// The isolated execution finished without a result
    EmptyResult,
    /// The child process exited unsuccessfully
    ChildExit,
}

/// Result of running one task: a status and a free-form payload.
///
/// On failure `result` holds the error message as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub status: ResultStatus,

    #[serde(default)]
    pub result: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    /// A successful result carrying the function's return value
    pub fn done(value: Value) -> Self {
        Self {
            status: ResultStatus::Done,
            result: value,
            failure: None,
        }
    }

    /// An error result carrying a message
    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            result: Value::String(message.into()),
            failure: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ResultStatus::Error
    }

    /// The error message of an error result
    pub fn error_message(&self) -> Option<String> {
        if !self.is_error() {
            return None;
        }
        Some(match &self.result {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        })
    }
}
