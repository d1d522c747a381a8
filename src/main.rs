//! TaskQ Worker - polling task-queue worker
//!
//! Entry point for the `taskq-worker` binary. `run` starts the poll loop;
//! the remaining commands manage tasks and configuration. The hidden
//! `exec-task` command is the child side of process isolation.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use taskq_worker::cli::{Cli, Commands, ConfigSubcommand, TasksSubcommand};
use taskq_worker::config::{self, TaskqConfig};
use taskq_worker::error::{Error, Result};
use taskq_worker::executor::serve_child_request;
use taskq_worker::loader::builtin;
use taskq_worker::logging;
use taskq_worker::store::open_store;
use taskq_worker::types::NewTask;
use taskq_worker::version;
use taskq_worker::worker::prepare_worker;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    // Commands that don't need the configured logging stack
    match &cli.command {
        Commands::Version => {
            version::print_version(&builtin());
            return Ok(());
        }
        Commands::ExecTask => {
            logging::init_simple(tracing::Level::WARN)?;
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            return serve_child_request(&builtin(), stdin.lock(), stdout.lock());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        Commands::Tasks {
            subcommand: TasksSubcommand::Modules,
        } => {
            print_modules();
            return Ok(());
        }
        _ => {}
    }

    let config_path = match &cli.command {
        Commands::Run { config, .. } | Commands::Submit { config, .. } => config.clone(),
        Commands::Tasks {
            subcommand: TasksSubcommand::List { config } | TasksSubcommand::Show { config, .. },
        } => config.clone(),
        _ => None,
    };

    let config = TaskqConfig::load(config_path.as_deref())?;

    // Guards must outlive the runtime so file logs are flushed
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Run { config_id, .. } => run_worker(config, config_id).await,
            Commands::Submit {
                module,
                func,
                params,
                project,
                ..
            } => submit_task(&config, module, func, &params, project).await,
            Commands::Tasks { subcommand } => handle_tasks_command(&config, subcommand).await,
            Commands::Version | Commands::ExecTask | Commands::Config { .. } => {
                Err(Error::Internal("command already handled".to_string()))
            }
        }
    })
}

/// Run the poll loop until a stop condition, Ctrl+C or a fatal error
async fn run_worker(config: TaskqConfig, config_id: Option<String>) -> Result<()> {
    let build = version::build_info();
    info!(
        version = %build.full_version(),
        backend = ?config.database.backend,
        path = %config.database.path,
        project = ?config.database.project,
        "Starting taskq worker"
    );

    let store = open_store(&config.database)?;
    let mut worker = prepare_worker(
        config.worker.clone(),
        config_id.as_deref(),
        store,
        Arc::new(builtin()),
    )
    .await?;

    let stop = worker.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current task");
            stop.stop();
        }
    });

    worker.start().await
}

async fn submit_task(
    config: &TaskqConfig,
    module: String,
    func: String,
    params: &str,
    project: Option<String>,
) -> Result<()> {
    let params: serde_json::Value = serde_json::from_str(params)
        .map_err(|e| Error::config_field_invalid("params", format!("params is not valid JSON: {}", e)))?;
    if !params.is_object() {
        return Err(Error::config_field_invalid("params", "params must be a JSON object"));
    }

    let store = open_store(&config.database)?;
    let mut task = NewTask::new(module, func, params);
    task.project = project;
    let record = store.add_task(task).await?;

    info!(task_id = record.task_id, target = %record.target(), "Task submitted");
    println!("{}", record.task_id);
    Ok(())
}

async fn handle_tasks_command(config: &TaskqConfig, subcommand: TasksSubcommand) -> Result<()> {
    let store = open_store(&config.database)?;
    match subcommand {
        TasksSubcommand::List { .. } => {
            let tasks = store.list_tasks().await?;
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in tasks {
                println!(
                    "{:>6}  {:<8}  {:<32}  {}",
                    task.task_id,
                    task.status,
                    task.target(),
                    task.project.as_deref().unwrap_or("-"),
                );
            }
        }
        TasksSubcommand::Show { task_id, .. } => {
            let task = store
                .get_task(task_id)
                .await?
                .ok_or(Error::TaskNotFound { task_id })?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TasksSubcommand::Modules => print_modules(),
    }
    Ok(())
}

fn print_modules() {
    let registry = builtin();
    for module in registry.modules() {
        println!("{}", module.name());
        for func in module.function_names() {
            println!("  {}.{}", module.name(), func);
        }
    }
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = TaskqConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            let cfg = TaskqConfig::load(config.as_deref())?;
            cfg.worker.resolve()?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
