//! Task loader
//!
//! Resolves a task's `(module, func)` pair to a callable:
//! - Registry of compiled-in task modules
//! - Invocation context with named arguments and cancellation
//! - The built-in `test_tasks` module

mod builtin;
mod context;
mod registry;

pub use builtin::*;
pub use context::*;
pub use registry::*;
