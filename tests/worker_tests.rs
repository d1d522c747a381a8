//! Poll loop integration tests
//!
//! Drives `Worker` against a recording in-memory store with the builtin
//! task registry.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use common::{fast_settings, RecordingStore};
use taskq_worker::error::Error;
use taskq_worker::executor::StrategyKind;
use taskq_worker::loader::{builtin, TEST_TASKS};
use taskq_worker::store::{local_host, TaskStore};
use taskq_worker::types::{TaskStatus, WorkerStatus};
use taskq_worker::worker::{Worker, WorkerPhase, WorkerSettings};

fn worker(store: &Arc<RecordingStore>, settings: WorkerSettings) -> Worker {
    Worker::new(store.clone(), Arc::new(builtin()), settings).unwrap()
}

fn one_batch() -> WorkerSettings {
    WorkerSettings {
        loops_limit: Some(1),
        ..fast_settings()
    }
}

// ─────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_successful_task_is_recorded() {
    let store = RecordingStore::new();
    let id = store.submit(TEST_TASKS, "double", json!({"x": 2})).await;

    let mut worker = worker(&store, one_batch());
    worker.start().await.unwrap();

    let task = store.task(id).await;
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.result, Some(json!(4)));
    assert!(task.started_time.is_some());
    assert!(task.finished_time.is_some());
    assert_eq!(store.terminal_writes(id), 1);
}

#[tokio::test]
async fn test_missing_module_is_recorded_and_loop_continues() {
    let store = RecordingStore::new();
    let missing = store.submit("nonexistent", "f", json!({})).await;
    let next = store.submit(TEST_TASKS, "echo", json!({"a": 1})).await;

    let mut worker = worker(&store, one_batch());
    worker.start().await.unwrap();

    let task = store.task(missing).await;
    assert_eq!(task.status, TaskStatus::Error);
    let error = task.error.unwrap();
    assert!(error.contains("nonexistent"));
    assert!(error.contains("not found"));

    let task = store.task(next).await;
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.result, Some(json!({"a": 1})));
}

#[tokio::test]
async fn test_missing_function_names_module_and_function() {
    let store = RecordingStore::new();
    let id = store.submit(TEST_TASKS, "no_such_func", json!({})).await;

    let mut worker = worker(&store, one_batch());
    worker.start().await.unwrap();

    let error = store.task(id).await.error.unwrap();
    assert!(error.contains(TEST_TASKS));
    assert!(error.contains("no_such_func"));
    assert!(error.contains("not found"));
}

// ─────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_status_only_moves_forward() {
    let store = RecordingStore::new();
    let ok = store.submit(TEST_TASKS, "echo", json!({})).await;
    let failed = store.submit(TEST_TASKS, "raise_exception", json!({})).await;

    let mut worker = worker(&store, one_batch());
    worker.start().await.unwrap();

    assert_eq!(
        store.transitions(ok),
        vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Done]
    );
    assert_eq!(
        store.transitions(failed),
        vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Error]
    );
}

#[tokio::test]
async fn test_every_claimed_task_gets_one_terminal_write() {
    let store = RecordingStore::new();
    let ids = vec![
        store.submit(TEST_TASKS, "echo", json!({})).await,
        store.submit(TEST_TASKS, "raise_exception", json!({})).await,
        store.submit(TEST_TASKS, "panic", json!({"message": "boom"})).await,
        store.submit("nonexistent", "f", json!({})).await,
        store.submit(TEST_TASKS, "double", json!({"x": "nope"})).await,
        store.submit(TEST_TASKS, "return_none", json!({})).await,
    ];

    let mut worker = worker(&store, one_batch());
    worker.start().await.unwrap();

    for id in &ids {
        assert_eq!(store.terminal_writes(*id), 1, "task {}", id);
        assert!(store.task(*id).await.status.is_terminal());
    }
    assert_eq!(worker.state().tasks_succeeded, 2);
    assert_eq!(worker.state().tasks_failed, 4);
}

#[tokio::test]
async fn test_failures_do_not_stop_the_batch() {
    let store = RecordingStore::new();
    let raise = store.submit(TEST_TASKS, "raise_exception", json!({"message": "bad input"})).await;
    let panic = store.submit(TEST_TASKS, "panic", json!({"message": "boom"})).await;
    let last = store.submit(TEST_TASKS, "double", json!({"x": 21})).await;

    let mut worker = worker(&store, one_batch());
    worker.start().await.unwrap();

    let error = store.task(raise).await.error.unwrap();
    assert!(error.contains("Exception in test_tasks.raise_exception()"));
    assert!(error.contains("bad input"));
    assert!(store.task(panic).await.error.unwrap().contains("boom"));
    assert_eq!(store.task(last).await.result, Some(json!(42)));
}

#[tokio::test]
async fn test_loops_limit_bounds_batches() {
    let store = RecordingStore::new();
    let mut worker = worker(
        &store,
        WorkerSettings {
            loops_limit: Some(3),
            ..fast_settings()
        },
    );
    worker.start().await.unwrap();

    assert_eq!(worker.state().loops, 3);
    assert_eq!(store.fetches(), 3);
}

#[tokio::test]
async fn test_life_timeout_ends_loop() {
    let store = RecordingStore::new();
    let mut worker = worker(
        &store,
        WorkerSettings {
            sleep_interval: Duration::from_millis(50),
            life_timeout: Some(Duration::from_millis(300)),
            ..fast_settings()
        },
    );

    let started = Instant::now();
    worker.start().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
    assert!(worker.state().loops >= 1);
    assert_eq!(worker.state().phase, WorkerPhase::Finished);
}

// ─────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_failures_back_off_and_recover() {
    let store = RecordingStore::new();
    let id = store.submit(TEST_TASKS, "echo", json!({})).await;
    store.fail_next_fetches(2);

    let mut worker = worker(
        &store,
        WorkerSettings {
            loops_limit: Some(3),
            ..fast_settings()
        },
    );
    let started = Instant::now();
    worker.start().await.unwrap();

    assert_eq!(store.fetches(), 3);
    assert_eq!(store.task(id).await.status, TaskStatus::Done);
    // two backoff sleeps of at least the 100ms floor, less jitter
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_stop_handle_ends_blocking_loop() {
    let store = RecordingStore::new();
    let handle = worker(
        &store,
        WorkerSettings {
            sleep_interval: Duration::from_secs(30),
            ..fast_settings()
        },
    )
    .spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();

    let state = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("worker did not stop")
        .unwrap();
    assert_eq!(state.phase, WorkerPhase::Finished);
    assert_eq!(state.loops, 1);

    let identity = store.get_worker(state.worker_id().unwrap()).await.unwrap().unwrap();
    assert_eq!(identity.status, WorkerStatus::Finished);
}

#[tokio::test]
async fn test_anonymous_worker_claims_with_host() {
    let store = RecordingStore::new();
    let id = store.submit(TEST_TASKS, "echo", json!({})).await;

    let mut worker = worker(
        &store,
        WorkerSettings {
            register: false,
            ..one_batch()
        },
    );
    worker.start().await.unwrap();

    let task = store.task(id).await;
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.worker_id, None);
    assert_eq!(task.worker_host.as_deref(), Some(local_host().as_str()));
    assert!(worker.state().identity.is_none());
}

#[tokio::test]
async fn test_strict_mode_aborts_after_recording() {
    let store = RecordingStore::new();
    let failed = store.submit(TEST_TASKS, "raise_exception", json!({})).await;
    store.submit(TEST_TASKS, "echo", json!({})).await;

    let mut worker = worker(
        &store,
        WorkerSettings {
            raise_on_error: true,
            ..one_batch()
        },
    );
    let err = worker.start().await.unwrap_err();
    assert!(matches!(err, Error::ExecutionFailed { .. }));

    assert_eq!(store.task(failed).await.status, TaskStatus::Error);
    assert_eq!(store.terminal_writes(failed), 1);
    let identity = store
        .get_worker(worker.state().worker_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity.status, WorkerStatus::Error);
}

#[tokio::test]
async fn test_strict_abort_leaves_no_task_running() {
    let store = RecordingStore::new();
    let failed = store.submit(TEST_TASKS, "raise_exception", json!({})).await;
    let unrun = store.submit(TEST_TASKS, "echo", json!({})).await;

    let mut worker = worker(
        &store,
        WorkerSettings {
            raise_on_error: true,
            ..one_batch()
        },
    );
    worker.start().await.unwrap_err();

    let task = store.task(unrun).await;
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.finished_time.is_some());
    assert!(task.error.unwrap().contains("aborted"));
    assert_eq!(store.terminal_writes(unrun), 1);
    assert_eq!(
        store.transitions(unrun),
        vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Error]
    );

    let identity = store
        .get_worker(worker.state().worker_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity.status, WorkerStatus::Error);
    assert_eq!(identity.failed_tasks, vec![failed, unrun]);
    assert_eq!(identity.current_task_id, None);
}

// ─────────────────────────────────────────────────────────────────
// Thread Strategies
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_killable_thread_times_out_and_continues() {
    let store = RecordingStore::new();
    let slow = store.submit(TEST_TASKS, "sleep", json!({"secs": 5.0})).await;
    let next = store.submit(TEST_TASKS, "echo", json!({})).await;

    let mut worker = worker(
        &store,
        WorkerSettings {
            execution_strategy: StrategyKind::KillableThread,
            timeout: Duration::from_millis(200),
            ..one_batch()
        },
    );
    let started = Instant::now();
    worker.start().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    let error = store.task(slow).await.error.unwrap();
    assert!(error.contains("exceeded timeout"));
    assert_eq!(store.task(next).await.status, TaskStatus::Done);
    assert_eq!(store.terminal_writes(slow), 1);
}

#[tokio::test]
async fn test_isolated_thread_timeout_is_fatal() {
    let store = RecordingStore::new();
    let stuck = store.submit(TEST_TASKS, "spin", json!({"secs": 2.0})).await;

    let mut worker = worker(
        &store,
        WorkerSettings {
            execution_strategy: StrategyKind::IsolatedThread,
            timeout: Duration::from_millis(200),
            ..one_batch()
        },
    );
    let err = worker.start().await.unwrap_err();
    assert!(matches!(err, Error::FatalTimeout { .. }));
    assert!(err.is_fatal());

    assert_eq!(store.task(stuck).await.status, TaskStatus::Error);
    assert_eq!(store.terminal_writes(stuck), 1);
    let identity = store
        .get_worker(worker.state().worker_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity.status, WorkerStatus::Error);
    assert_eq!(identity.failed_tasks, vec![stuck]);
}

#[tokio::test]
async fn test_fatal_timeout_records_rest_of_batch() {
    let store = RecordingStore::new();
    let stuck = store.submit(TEST_TASKS, "spin", json!({"secs": 2.0})).await;
    let unrun = store.submit(TEST_TASKS, "echo", json!({})).await;

    let mut worker = worker(
        &store,
        WorkerSettings {
            execution_strategy: StrategyKind::IsolatedThread,
            timeout: Duration::from_millis(200),
            ..one_batch()
        },
    );
    let err = worker.start().await.unwrap_err();
    assert!(matches!(err, Error::FatalTimeout { .. }));

    let task = store.task(unrun).await;
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.finished_time.is_some());
    assert!(task.error.unwrap().contains("aborted"));
    assert_eq!(store.terminal_writes(unrun), 1);
    assert_eq!(store.terminal_writes(stuck), 1);

    let identity = store
        .get_worker(worker.state().worker_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity.status, WorkerStatus::Error);
    assert_eq!(identity.failed_tasks, vec![stuck, unrun]);
}
