//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the taskq worker.

use clap::{Parser, Subcommand};

/// TaskQ Worker - polling task-queue worker
///
/// Fetches pending tasks from the task store, runs them under the
/// configured execution strategy and records every result.
#[derive(Parser, Debug)]
#[command(name = "taskq-worker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the worker
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the worker poll loop
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "TASKQ_CONFIG")]
        config: Option<String>,

        /// Persisted worker configuration record to merge
        #[arg(long, env = "TASKQ_CONFIG_ID")]
        config_id: Option<String>,
    },

    /// Add a task to the store
    Submit {
        /// Path to configuration file
        #[arg(short, long, env = "TASKQ_CONFIG")]
        config: Option<String>,

        /// Task module name
        #[arg(short, long)]
        module: String,

        /// Function within the module
        #[arg(short, long)]
        func: String,

        /// Named parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Project to file the task under (defaults to the store's project)
        #[arg(long)]
        project: Option<String>,
    },

    /// Inspect tasks and task modules
    Tasks {
        #[command(subcommand)]
        subcommand: TasksSubcommand,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Run one task request from stdin and write its result to stdout
    #[command(hide = true)]
    ExecTask,
}

/// Task inspection subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum TasksSubcommand {
    /// List every task in the store
    List {
        /// Path to configuration file
        #[arg(short, long, env = "TASKQ_CONFIG")]
        config: Option<String>,
    },

    /// Show one task as JSON
    Show {
        /// Task identifier
        task_id: u64,

        /// Path to configuration file
        #[arg(short, long, env = "TASKQ_CONFIG")]
        config: Option<String>,
    },

    /// List the task modules compiled into this binary
    Modules,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
