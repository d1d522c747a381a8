//! Error types for the taskq worker
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Classification into fatal / retryable conditions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::TaskId;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,
    Serialization = 204,

    // Task store errors (3xx)
    StoreUnavailable = 300,
    StoreConflict = 301,
    TaskNotFound = 302,
    WorkerNotFound = 303,

    // Resolution errors (4xx)
    ModuleNotFound = 400,
    FunctionNotFound = 401,

    // Execution errors (5xx)
    ExecutionFailed = 500,
    EmptyResult = 502,
    ChildFailed = 503,
    FatalTimeout = 510,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the worker
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Task Store Errors
    // ─────────────────────────────────────────────────────────────

    /// The store could not be reached or is in a bad state
    #[error("Task store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// A write that would break the task lifecycle
    #[error("Task {task_id} rejected by store: {message}")]
    StoreConflict { task_id: TaskId, message: String },

    /// Task does not exist
    #[error("Task {task_id} not found")]
    TaskNotFound { task_id: TaskId },

    /// Worker record does not exist
    #[error("Worker {worker_id} not found")]
    WorkerNotFound { worker_id: u64 },

    // ─────────────────────────────────────────────────────────────
    // Resolution Errors
    // ─────────────────────────────────────────────────────────────

    /// No module registered under this name
    #[error("Module '{module}' not found")]
    ModuleNotFound { module: String },

    /// Module exists but has no such function
    #[error("Function '{func}' not found in module '{module}'")]
    FunctionNotFound { module: String, func: String },

    // ─────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────

    /// Task execution failed (propagated when raise_on_error is set)
    #[error("Task execution failed: {message}")]
    ExecutionFailed {
        task_id: Option<TaskId>,
        message: String,
    },

    /// The isolated execution finished without producing a result
    #[error("Task {task_id}: result channel empty")]
    EmptyResult { task_id: TaskId },

    /// The task's child process could not be run or failed
    #[error("Task child process failed: {message}")]
    ChildFailed { message: String },

    /// A task thread could not be reclaimed after its timeout; the worker must exit
    #[error("Task {task_id} is unresponsive after {timeout_secs}s timeout, aborting worker")]
    FatalTimeout { task_id: TaskId, timeout_secs: f64 },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::Serialization,
            Error::Json(_) => ErrorCode::Serialization,

            Error::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            Error::StoreConflict { .. } => ErrorCode::StoreConflict,
            Error::TaskNotFound { .. } => ErrorCode::TaskNotFound,
            Error::WorkerNotFound { .. } => ErrorCode::WorkerNotFound,

            Error::ModuleNotFound { .. } => ErrorCode::ModuleNotFound,
            Error::FunctionNotFound { .. } => ErrorCode::FunctionNotFound,

            Error::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            Error::EmptyResult { .. } => ErrorCode::EmptyResult,
            Error::ChildFailed { .. } => ErrorCode::ChildFailed,
            Error::FatalTimeout { .. } => ErrorCode::FatalTimeout,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable { .. }
                | Error::Io(_)
                | Error::IoRead { .. }
                | Error::IoWrite { .. }
        )
    }

    /// Check if the error is fatal (worker process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Config(_)
                | Error::FatalTimeout { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'taskq-worker config init' to create a default configuration file.",
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'taskq-worker config validate' to see details.",
            ),
            Error::ConfigValidation { .. } | Error::Config(_) => Some(
                "Review the configuration file and fix the invalid values.",
            ),
            Error::StoreUnavailable { .. } => Some(
                "Check the [database] section: the store path must be readable and writable.",
            ),
            Error::ModuleNotFound { .. } | Error::FunctionNotFound { .. } => Some(
                "Only modules compiled into this binary can be run. See 'taskq-worker tasks modules'.",
            ),
            Error::FatalTimeout { .. } => Some(
                "Use the 'isolated-process' execution strategy for tasks that may not finish in time.",
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a store unavailable error
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create a store conflict error
    pub fn store_conflict(task_id: TaskId, message: impl Into<String>) -> Self {
        Error::StoreConflict {
            task_id,
            message: message.into(),
        }
    }

    /// Create an execution failed error
    pub fn execution_failed(task_id: Option<TaskId>, message: impl Into<String>) -> Self {
        Error::ExecutionFailed {
            task_id,
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::StoreUnavailable.as_str(), "E300");
        assert_eq!(ErrorCode::FatalTimeout.as_str(), "E510");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigNotFound.exit_code(), 10);
        assert_eq!(ErrorCode::IoRead.exit_code(), 20);
        assert_eq!(ErrorCode::StoreConflict.exit_code(), 30);
        assert_eq!(ErrorCode::ModuleNotFound.exit_code(), 40);
        assert_eq!(ErrorCode::FatalTimeout.exit_code(), 50);
        assert_eq!(ErrorCode::InternalError.exit_code(), 90);
    }

    #[test]
    fn test_resolution_messages_name_the_target() {
        let err = Error::FunctionNotFound {
            module: "reports".into(),
            func: "build".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("reports"));
        assert!(msg.contains("build"));
        assert!(msg.contains("not found"));
        assert_eq!(err.code(), ErrorCode::FunctionNotFound);
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::FatalTimeout { task_id: 1, timeout_secs: 1.0 }.is_fatal());
        assert!(Error::config_parse("bad").is_fatal());
        assert!(!Error::store_unavailable("down").is_fatal());
        assert!(!Error::execution_failed(Some(3), "boom").is_fatal());
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::store_unavailable("down").is_retryable());
        assert!(!Error::store_conflict(4, "not running").is_retryable());
        assert!(!Error::ModuleNotFound { module: "m".into() }.is_retryable());
    }

    #[test]
    fn test_format_for_terminal() {
        let err = Error::ConfigNotFound {
            path: PathBuf::from("/test/config.toml"),
        };
        let formatted = err.format_for_terminal();
        assert!(formatted.contains("E100"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("config init"));
    }

    #[test]
    fn test_format_for_log() {
        let formatted = Error::EmptyResult { task_id: 9 }.format_for_log();
        assert!(formatted.contains("[E502]"));
        assert!(formatted.contains("result channel empty"));
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert_eq!(err.code(), ErrorCode::IoNotFound);
    }
}
