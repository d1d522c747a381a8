//! TaskQ Worker
//!
//! A polling task-queue worker: fetches pending tasks from a `TaskStore`,
//! resolves each one in a compiled-in `TaskRegistry`, runs it under an
//! `ExecutionStrategy` with a timeout and records exactly one terminal
//! result per task.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod loader;
pub mod logging;
pub mod store;
pub mod types;
pub mod version;
pub mod worker;

pub use error::{Error, Result};
