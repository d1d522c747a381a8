//! Compiled-in dispatch table of task functions
//!
//! A task names its function by `(module, func)`. Lookups never fail loudly:
//! an unknown name is logged and reported as `None` so the caller can record
//! a task error instead of stopping the worker.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::error;

use super::TaskContext;

/// Signature of a task function
pub type TaskFn = fn(&TaskContext) -> anyhow::Result<Value>;

// ─────────────────────────────────────────────────────────────────
// Task Module
// ─────────────────────────────────────────────────────────────────

/// A named group of task functions
#[derive(Debug, Clone, Default)]
pub struct TaskModule {
    name: String,
    functions: BTreeMap<String, TaskFn>,
}

impl TaskModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: BTreeMap::new(),
        }
    }

    /// Add a function (builder style)
    pub fn with(mut self, func: impl Into<String>, function: TaskFn) -> Self {
        self.functions.insert(func.into(), function);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, func: &str) -> Option<TaskFn> {
        self.functions.get(func).copied()
    }

    /// Function names in sorted order
    pub fn function_names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Registry
// ─────────────────────────────────────────────────────────────────

/// Registry of task modules by name
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    modules: BTreeMap<String, TaskModule>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, replacing any module with the same name
    pub fn register(&mut self, module: TaskModule) {
        self.modules.insert(module.name.clone(), module);
    }

    /// Register a module (builder style)
    pub fn with_module(mut self, module: TaskModule) -> Self {
        self.register(module);
        self
    }

    /// Locate a module by name
    pub fn resolve(&self, module: &str) -> Option<&TaskModule> {
        let found = self.modules.get(module);
        if found.is_none() {
            error!(module = %module, "Module '{}' not found", module);
        }
        found
    }

    /// Locate a function within a module
    pub fn resolve_function(&self, module: &str, func: &str) -> Option<TaskFn> {
        let found = self.resolve(module)?.get(func);
        if found.is_none() {
            error!(
                module = %module,
                func = %func,
                "Function '{}' not found in module '{}'",
                func,
                module
            );
        }
        found
    }

    /// Whether a module is registered, without logging
    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Registered module names in sorted order
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    pub fn modules(&self) -> impl Iterator<Item = &TaskModule> {
        self.modules.values()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
