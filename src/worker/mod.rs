//! Poll loop
//!
//! Owns the worker's configuration, cadence and lifetime:
//! - Resolved settings
//! - Explicit loop state and stop handle
//! - The batch loop and the process entry point

mod poll;
mod settings;
mod state;

pub use poll::*;
pub use settings::*;
pub use state::*;
