//! Type definitions for the taskq worker
//!
//! Task and worker records as stored by the task store, and the result
//! produced by running a task.

mod result;
mod task;
mod worker;

pub use result::*;
pub use task::*;
pub use worker::*;
