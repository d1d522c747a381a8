//! Task functions compiled into the worker binary
//!
//! The `test_tasks` module covers every execution path: plain returns,
//! failures, panics, cooperative and uncooperative long runs, and a hard
//! process exit.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};

use super::{TaskContext, TaskModule, TaskRegistry};

/// Name of the built-in test module
pub const TEST_TASKS: &str = "test_tasks";

/// The registry shipped with the binary
pub fn builtin() -> TaskRegistry {
    TaskRegistry::new().with_module(test_tasks())
}

/// The `test_tasks` module
pub fn test_tasks() -> TaskModule {
    TaskModule::new(TEST_TASKS)
        .with("return_none", return_none)
        .with("echo", echo)
        .with("double", double)
        .with("sleep", sleep)
        .with("spin", spin)
        .with("raise_exception", raise_exception)
        .with("panic", panic)
        .with("exit", exit)
}

fn return_none(_ctx: &TaskContext) -> anyhow::Result<Value> {
    Ok(Value::Null)
}

/// Returns its parameters unchanged
fn echo(ctx: &TaskContext) -> anyhow::Result<Value> {
    Ok(Value::Object(ctx.params().clone()))
}

/// `x * 2`, keeping integers integral
fn double(ctx: &TaskContext) -> anyhow::Result<Value> {
    let x: Value = ctx.arg("x")?;
    if let Some(n) = x.as_i64() {
        let doubled = n
            .checked_mul(2)
            .ok_or_else(|| anyhow!("x * 2 overflows: x = {}", n))?;
        return Ok(json!(doubled));
    }
    match x.as_f64() {
        Some(n) => Ok(json!(n * 2.0)),
        None => bail!("argument 'x' must be a number, got {}", x),
    }
}

/// Sleeps for `secs` seconds, honoring cancellation
fn sleep(ctx: &TaskContext) -> anyhow::Result<Value> {
    let secs: f64 = ctx.arg_or("secs", 1.0)?;
    ctx.sleep(seconds(secs)?)?;
    Ok(json!({ "slept": secs }))
}

/// Blocks for `secs` seconds without ever checking cancellation.
///
/// With `touch`, writes that file once the wait is over, so a caller can
/// tell whether the task outlived its timeout.
fn spin(ctx: &TaskContext) -> anyhow::Result<Value> {
    let secs: f64 = ctx.arg_or("secs", 1.0)?;
    let touch: Option<PathBuf> = ctx.arg_or("touch", None)?;
    std::thread::sleep(seconds(secs)?);
    if let Some(path) = &touch {
        fs::write(path, b"spun")
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(json!({ "spun": secs }))
}

fn raise_exception(ctx: &TaskContext) -> anyhow::Result<Value> {
    let message: String = ctx.arg_or("message", "test exception".to_string())?;
    bail!(message)
}

fn panic(ctx: &TaskContext) -> anyhow::Result<Value> {
    let message: String = ctx.arg_or("message", "test panic".to_string())?;
    panic!("{}", message)
}

/// Terminates the current process with `code`; only sensible in a child process
fn exit(ctx: &TaskContext) -> anyhow::Result<Value> {
    let code: i32 = ctx.arg_or("code", 3)?;
    std::process::exit(code)
}

fn seconds(secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("invalid duration {}: {}", secs, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::CancelFlag;
    use serde_json::Map;

    fn call(func: &str, params: Value) -> anyhow::Result<Value> {
        let registry = builtin();
        let function = registry.resolve_function(TEST_TASKS, func).unwrap();
        let params = params.as_object().cloned().unwrap_or_else(Map::new);
        function(&TaskContext::new(1, params, CancelFlag::new()))
    }

    #[test]
    fn test_builtin_functions_registered() {
        let registry = builtin();
        let module = registry.resolve(TEST_TASKS).unwrap();
        for name in ["return_none", "echo", "double", "sleep", "spin", "raise_exception", "panic", "exit"] {
            assert!(module.get(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_double() {
        assert_eq!(call("double", json!({"x": 2})).unwrap(), json!(4));
        assert_eq!(call("double", json!({"x": 1.5})).unwrap(), json!(3.0));
        assert!(call("double", json!({"x": "a"})).is_err());
        assert!(call("double", json!({})).is_err());
    }

    #[test]
    fn test_echo_and_return_none() {
        assert_eq!(call("echo", json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert_eq!(call("return_none", json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn test_raise_exception_message() {
        let err = call("raise_exception", json!({"message": "boom"})).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_spin_touches_marker_when_done() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spun");
        let params = json!({"secs": 0.01, "touch": marker.to_str().unwrap()});
        assert_eq!(call("spin", params).unwrap(), json!({"spun": 0.01}));
        assert!(marker.exists());
    }

    #[test]
    fn test_sleep_rejects_negative() {
        assert!(call("sleep", json!({"secs": -1.0})).is_err());
        assert_eq!(call("sleep", json!({"secs": 0.01})).unwrap(), json!({"slept": 0.01}));
    }
}
