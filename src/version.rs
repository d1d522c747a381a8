//! Version report
//!
//! Build values are embedded by `build.rs`. The report also lists what this
//! binary can execute: its strategies, the child protocol entry point and
//! the compiled-in task modules.

use std::fmt;

use crate::executor::{StrategyKind, CHILD_SUBCOMMAND};
use crate::loader::TaskRegistry;

/// Build values embedded at compile time
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Short commit hash, "unknown" outside a checkout
    pub git_hash: &'static str,
    git_dirty: &'static str,
    pub built: &'static str,
    pub profile: &'static str,
    pub target: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("TASKQ_GIT_HASH"),
            git_dirty: env!("TASKQ_GIT_DIRTY"),
            built: env!("TASKQ_BUILD_TIMESTAMP"),
            profile: env!("TASKQ_PROFILE"),
            target: env!("TASKQ_TARGET"),
        }
    }

    pub fn git_dirty(&self) -> bool {
        self.git_dirty == "true"
    }

    /// Version with the commit, e.g. "0.1.0-abc12345"
    pub fn full_version(&self) -> String {
        if self.git_dirty() {
            format!("{}-{}-dirty", self.version, self.git_hash)
        } else {
            format!("{}-{}", self.version, self.git_hash)
        }
    }
}

/// Everything `taskq-worker version` prints
#[derive(Debug, Clone)]
pub struct VersionReport {
    pub build: BuildInfo,
    pub strategies: Vec<StrategyKind>,
    /// Module name and function count, sorted by name
    pub modules: Vec<(String, usize)>,
}

impl VersionReport {
    pub fn new(registry: &TaskRegistry) -> Self {
        let mut modules: Vec<(String, usize)> = registry
            .modules()
            .map(|m| (m.name().to_string(), m.function_names().len()))
            .collect();
        modules.sort();
        Self {
            build: BuildInfo::current(),
            strategies: StrategyKind::ALL.to_vec(),
            modules,
        }
    }

    pub fn function_count(&self) -> usize {
        self.modules.iter().map(|(_, n)| n).sum()
    }
}

impl fmt::Display for VersionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let build = &self.build;
        writeln!(f, "{} {}", build.name, build.full_version())?;
        writeln!(f)?;
        writeln!(
            f,
            "  Git Hash:   {}{}",
            build.git_hash,
            if build.git_dirty() { " (dirty)" } else { "" }
        )?;
        writeln!(f, "  Built:      {} ({})", build.built, build.profile)?;
        writeln!(f, "  Target:     {}", build.target)?;
        writeln!(f)?;
        writeln!(f, "Execution:")?;
        let strategies: Vec<&str> = self.strategies.iter().map(|s| s.as_str()).collect();
        writeln!(f, "  Strategies: {}", strategies.join(", "))?;
        writeln!(f, "  Child:      {} {}", build.name, CHILD_SUBCOMMAND)?;
        writeln!(f)?;
        writeln!(
            f,
            "Task Modules: {} modules, {} functions",
            self.modules.len(),
            self.function_count()
        )?;
        for (name, count) in &self.modules {
            writeln!(f, "  {:<20} {}", name, count)?;
        }
        Ok(())
    }
}

pub fn build_info() -> BuildInfo {
    BuildInfo::current()
}

/// Print the version report for `registry` to stdout
pub fn print_version(registry: &TaskRegistry) {
    print!("{}", VersionReport::new(registry));
}
