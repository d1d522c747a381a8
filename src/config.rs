//! Configuration system for the taskq worker
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TASKQ_* prefix)
//! 3. Configuration file (TOML)
//! 4. Persisted configuration record in the task store (worker options only)
//! 5. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::StrategyKind;
use crate::worker::WorkerSettings;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskqConfig {
    /// Task store settings
    pub database: DatabaseSettings,

    /// Poll loop options
    pub worker: WorkerOptions,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Where tasks are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; lost on exit
    Memory,
    /// JSON snapshot on disk
    #[default]
    File,
}

/// Task store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub backend: StoreBackend,

    /// Store file for the `file` backend
    pub path: String,

    /// Only claim tasks of this project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: "~/.taskq/tasks.json".to_string(),
            project: None,
        }
    }
}

/// Worker options as given by a caller or a persisted record.
///
/// Every field is optional so that sources can be layered; `resolve` fills
/// anything left unset with the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Start the poll loop at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Run until a stop condition (true) or a single batch (false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_strategy: Option<StrategyKind>,

    /// Seconds between batches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_interval: Option<f64>,

    /// Per-task timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    /// Maximum loop runtime in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub life_timeout: Option<f64>,

    /// Maximum number of batches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loops_limit: Option<u64>,

    /// Maximum tasks fetched per batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_limit: Option<usize>,

    /// Propagate task failures after recording them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raise_on_error: Option<bool>,

    /// Register a worker identity in the store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<bool>,

    /// Seconds a cancelled killable-thread task gets to stop
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_grace: Option<f64>,

    /// Persisted configuration record to merge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Rotate the log file hourly or daily
    pub rotation: String,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            rotation: "daily".to_string(),
            max_files: 5,
            json_format: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Worker Options
// ─────────────────────────────────────────────────────────────────

impl WorkerOptions {
    /// Layer `self` over `fallback`: values set here win, unset ones are
    /// taken from `fallback`
    pub fn or(self, fallback: WorkerOptions) -> WorkerOptions {
        WorkerOptions {
            enabled: self.enabled.or(fallback.enabled),
            blocking: self.blocking.or(fallback.blocking),
            execution_strategy: self.execution_strategy.or(fallback.execution_strategy),
            sleep_interval: self.sleep_interval.or(fallback.sleep_interval),
            timeout: self.timeout.or(fallback.timeout),
            life_timeout: self.life_timeout.or(fallback.life_timeout),
            loops_limit: self.loops_limit.or(fallback.loops_limit),
            task_limit: self.task_limit.or(fallback.task_limit),
            raise_on_error: self.raise_on_error.or(fallback.raise_on_error),
            register: self.register.or(fallback.register),
            kill_grace: self.kill_grace.or(fallback.kill_grace),
            config_id: self.config_id.or(fallback.config_id),
        }
    }

    /// Read options from a persisted configuration record.
    ///
    /// The record is either the options themselves or a full configuration
    /// mapping with a `worker` key.
    pub fn from_record(record: &Value) -> Result<WorkerOptions> {
        let options = match record.get("worker") {
            Some(worker @ Value::Object(_)) => worker,
            _ => record,
        };
        serde_json::from_value(options.clone()).map_err(|e| Error::ConfigValidation {
            message: format!("invalid persisted worker configuration: {}", e),
            field: Some("worker".to_string()),
        })
    }

    /// Apply built-in defaults and validate
    pub fn resolve(&self) -> Result<WorkerSettings> {
        let defaults = WorkerSettings::default();

        let task_limit = self.task_limit.unwrap_or(defaults.task_limit);
        if task_limit == 0 {
            return Err(Error::config_field_invalid(
                "worker.task_limit",
                "task_limit must be at least 1",
            ));
        }

        let timeout = seconds_or("worker.timeout", self.timeout, defaults.timeout)?;
        if timeout.is_zero() {
            return Err(Error::config_field_invalid(
                "worker.timeout",
                "timeout must be greater than 0",
            ));
        }

        Ok(WorkerSettings {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            blocking: self.blocking.unwrap_or(defaults.blocking),
            execution_strategy: self
                .execution_strategy
                .unwrap_or(defaults.execution_strategy),
            sleep_interval: seconds_or(
                "worker.sleep_interval",
                self.sleep_interval,
                defaults.sleep_interval,
            )?,
            timeout,
            life_timeout: self
                .life_timeout
                .map(|t| seconds("worker.life_timeout", t))
                .transpose()?,
            loops_limit: self.loops_limit,
            task_limit,
            raise_on_error: self.raise_on_error.unwrap_or(defaults.raise_on_error),
            register: self.register.unwrap_or(defaults.register),
            kill_grace: seconds_or("worker.kill_grace", self.kill_grace, defaults.kill_grace)?,
        })
    }
}

fn seconds_or(field: &str, value: Option<f64>, default: Duration) -> Result<Duration> {
    value.map(|v| seconds(field, v)).transpose().map(|d| d.unwrap_or(default))
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::config_field_invalid(
            field,
            format!("{} must be a non-negative number of seconds, got {}", field, value),
        ));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| Error::config_field_invalid(field, format!("{}: {}", field, e)))
}

// ─────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────

impl TaskqConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = Self::parse(&content)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse TOML configuration text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    pub fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            PathBuf::from("taskq-worker.toml"),
            dirs::config_dir()
                .map(|p| p.join("taskq").join("worker.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".taskq").join("worker.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Database settings
        if let Some(val) = env_parse::<StoreBackendName>("TASKQ_DATABASE_BACKEND") {
            self.database.backend = val.0;
        }
        if let Ok(val) = std::env::var("TASKQ_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Ok(val) = std::env::var("TASKQ_PROJECT") {
            self.database.project = Some(val);
        }

        // Worker options
        let worker = &mut self.worker;
        if let Some(val) = env_parse("TASKQ_ENABLED") {
            worker.enabled = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_BLOCKING") {
            worker.blocking = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_EXECUTION_STRATEGY") {
            worker.execution_strategy = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_SLEEP_INTERVAL") {
            worker.sleep_interval = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_TIMEOUT") {
            worker.timeout = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_LIFE_TIMEOUT") {
            worker.life_timeout = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_LOOPS_LIMIT") {
            worker.loops_limit = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_TASK_LIMIT") {
            worker.task_limit = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_RAISE_ON_ERROR") {
            worker.raise_on_error = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_REGISTER") {
            worker.register = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_KILL_GRACE") {
            worker.kill_grace = Some(val);
        }
        if let Ok(val) = std::env::var("TASKQ_CONFIG_ID") {
            worker.config_id = Some(val);
        }

        // Logging settings
        if let Ok(val) = std::env::var("TASKQ_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TASKQ_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(val) = env_parse("TASKQ_LOG_JSON") {
            self.logging.json_format = val;
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.database.path = expand_path(&self.database.path);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.backend == StoreBackend::File && self.database.path.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "database.path",
                "database path cannot be empty for the file backend",
            ));
        }

        self.worker.resolve()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        let valid_rotations = ["hourly", "daily", "never"];
        if !valid_rotations.contains(&self.logging.rotation.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.rotation",
                format!(
                    "Invalid log rotation '{}'. Must be one of: {}",
                    self.logging.rotation,
                    valid_rotations.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

/// Read and parse an environment variable, ignoring (with a warning) values
/// that do not parse
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

struct StoreBackendName(StoreBackend);

impl std::str::FromStr for StoreBackendName {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self(StoreBackend::Memory)),
            "file" => Ok(Self(StoreBackend::File)),
            _ => Err(()),
        }
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

// ─────────────────────────────────────────────────────────────────
// Config File Generation
// ─────────────────────────────────────────────────────────────────

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".taskq")
        .join("worker.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# taskq worker configuration

[database]
# Task store backend: "file" or "memory"
backend = "file"

# Store file for the file backend
path = "~/.taskq/tasks.json"

# Only claim tasks of this project
# project = "default"

[worker]
# Set to false to keep the poll loop from starting
enabled = true

# Run until a stop condition (true) or a single batch (false)
blocking = true

# How tasks run: "none", "isolated-process", "isolated-thread", "killable-thread"
execution_strategy = "none"

# Seconds between batches
sleep_interval = 1.0

# Per-task timeout in seconds
timeout = 300.0

# Stop after this many seconds
# life_timeout = 3600.0

# Stop after this many batches
# loops_limit = 10

# Maximum tasks fetched per batch
task_limit = 20

# Stop the worker when a task fails (the failure is recorded first)
raise_on_error = false

# Register a worker identity in the store
register = true

# Seconds a cancelled killable-thread task gets to stop
kill_grace = 0.5

# Merge options from a configuration record stored under this id
# config_id = "default"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.taskq/logs/worker.log"

# Log file rotation: hourly, daily, never
rotation = "daily"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
