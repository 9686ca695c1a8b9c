//! Supervisor terminal-outcome policy, driven through a scripted solver.

mod common;

use common::fixtures::{make_task, test_config};
use sq_core::solver::{CommandSolver, FakeSolver, Solver};
use sq_core::state::store::TaskStore;
use sq_core::state::task::mark_queued;
use sq_core::supervisor::{Supervisor, SupervisorError, TerminalOutcome};
use sq_protocol::config_models::EngineConfig;
use sq_protocol::ipc::Event;
use sq_protocol::task_models::{Priority, Task, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn progress_lines() -> Vec<String> {
    vec![
        "当前进度: 10 % - 网格划分".to_string(),
        "当前进度: 55 % - 求解中".to_string(),
        "当前进度: 100 % - 完成".to_string(),
    ]
}

/// Run one task through a supervisor and return the result, the final task
/// record, and every emitted event.
async fn run_to_outcome(
    solver: Arc<dyn Solver>,
    config: EngineConfig,
    task: Task,
) -> (
    Result<TerminalOutcome, SupervisorError>,
    Task,
    Vec<Event>,
) {
    let (events_tx, mut events_rx) = mpsc::channel(1024);
    let store = TaskStore::new();
    let handle = store.insert(task).await;
    {
        let mut t = handle.lock().await;
        mark_queued(&mut t, &events_tx).await.expect("queue task");
    }

    let supervisor = Supervisor::new(solver, Arc::new(config), events_tx);
    let result = supervisor
        .execute(Arc::clone(&handle), CancellationToken::new())
        .await;

    let task = handle.lock().await.clone();
    drop(supervisor);
    let mut events = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        events.push(event);
    }
    (result, task, events)
}

#[tokio::test]
async fn clean_run_completes_with_full_progress() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let task = make_task(dir.path(), &config, "clean", Priority::Normal);
    let expected_result = task
        .output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .expect("output filename");

    let solver = Arc::new(FakeSolver::new(progress_lines(), 0));
    let (result, task, _events) = run_to_outcome(solver, config, task).await;

    assert_eq!(
        result.expect("outcome"),
        TerminalOutcome::Completed {
            result_filename: expected_result.clone()
        }
    );
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress_percentage, 100.0);
    assert_eq!(task.result_filename, Some(expected_result));
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
    assert!(task.execution_time.is_some());
}

#[tokio::test]
async fn nonzero_exit_fails_with_message_from_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let task = make_task(dir.path(), &config, "broken", Priority::Normal);

    let solver = Arc::new(FakeSolver::new(progress_lines(), 1));
    let (result, task, _events) = run_to_outcome(solver, config, task).await;

    match result.expect("outcome") {
        TerminalOutcome::Failed { message } => assert!(!message.is_empty()),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .as_deref()
        .expect("error message")
        .contains("code 1"));
    // Raw output retained for diagnosis.
    assert!(task.error_log.expect("error log").contains("求解中"));
}

#[tokio::test]
async fn error_markers_override_zero_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let task = make_task(dir.path(), &config, "marked", Priority::Normal);

    let mut lines = progress_lines();
    lines.push("/*****错误********/".to_string());
    lines.push("以下特征遇到问题:".to_string());
    let solver = Arc::new(FakeSolver::new(lines, 0));
    let (result, task, _events) = run_to_outcome(solver, config, task).await;

    assert!(matches!(
        result.expect("outcome"),
        TerminalOutcome::Failed { .. }
    ));
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.is_some());
}

#[tokio::test]
async fn missing_output_artifact_fails_clean_exit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let task = make_task(dir.path(), &config, "noout", Priority::Normal);

    let solver = Arc::new(FakeSolver::new(progress_lines(), 0).with_output_file(false));
    let (result, task, _events) = run_to_outcome(solver, config, task).await;

    match result.expect("outcome") {
        TerminalOutcome::Failed { message } => assert!(message.contains("no output")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn progress_events_are_monotonic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let task = make_task(dir.path(), &config, "jitter", Priority::Normal);

    let lines = vec![
        "当前进度: 10 % - 网格划分".to_string(),
        "当前进度: 5 % - 网格划分".to_string(),
        "当前进度: 40 % - 求解中".to_string(),
        "当前进度: 40 % - 求解中".to_string(),
        "当前进度: 100 % - 完成".to_string(),
    ];
    let solver = Arc::new(FakeSolver::new(lines, 0));
    let (result, task, events) = run_to_outcome(solver, config, task).await;

    assert!(matches!(
        result.expect("outcome"),
        TerminalOutcome::Completed { .. }
    ));
    assert_eq!(task.progress_percentage, 100.0);

    let observed: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            Event::TaskProgress { percentage, .. } => Some(*percentage),
            _ => None,
        })
        .collect();
    assert_eq!(observed, vec![10.0, 40.0, 100.0]);
}

#[tokio::test]
async fn log_file_mirrors_solver_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let logs_dir = config.logs_dir.clone();
    let task = make_task(dir.path(), &config, "logged", Priority::Normal);

    let solver = Arc::new(FakeSolver::new(progress_lines(), 0));
    let (result, task, _events) = run_to_outcome(solver, config, task).await;
    result.expect("outcome");

    let log_name = task.log_filename.expect("log filename recorded");
    let content =
        std::fs::read_to_string(logs_dir.join(log_name)).expect("log file readable");
    for line in progress_lines() {
        assert!(content.contains(&line));
    }
}

#[tokio::test]
async fn spawn_failure_forces_failed_and_resignals() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());
    config.solver_executable = PathBuf::from("definitely-not-a-solver-xyz");
    let task = make_task(dir.path(), &config, "nolaunch", Priority::Normal);

    let solver = Arc::new(CommandSolver::new(&config));
    let (result, task, _events) = run_to_outcome(solver, config, task).await;

    // The internal error is re-signaled for operational visibility...
    assert!(result.is_err());
    // ...but the task never stays non-terminal.
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .expect("error message")
        .contains("spawn"));
    assert!(task.execution_time.is_some());
}

#[tokio::test]
async fn wall_clock_timeout_follows_cancellation_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());
    config.task_timeout_secs = 1;
    let task = make_task(dir.path(), &config, "slow", Priority::Normal);

    let lines: Vec<String> = (1..=20)
        .map(|i| format!("当前进度: {i} % - 求解中"))
        .collect();
    let solver = FakeSolver::new(lines, 0).with_line_delay(Duration::from_millis(200));
    let kill_flag = solver.kill_flag();

    let (result, task, _events) = run_to_outcome(Arc::new(solver), config, task).await;

    assert_eq!(result.expect("outcome"), TerminalOutcome::TimedOut);
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.execution_time.is_some());
    assert!(kill_flag.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn cancellation_token_stops_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let task = make_task(dir.path(), &config, "cancelme", Priority::Normal);

    let lines: Vec<String> = (1..=50)
        .map(|i| format!("当前进度: {i} % - 求解中"))
        .collect();
    let solver = FakeSolver::new(lines, 0).with_line_delay(Duration::from_millis(100));
    let kill_flag = solver.kill_flag();

    let (events_tx, _events_rx) = mpsc::channel(1024);
    let store = TaskStore::new();
    let handle = store.insert(task).await;
    {
        let mut t = handle.lock().await;
        mark_queued(&mut t, &events_tx).await.expect("queue task");
    }

    let supervisor = Supervisor::new(Arc::new(solver), Arc::new(config), events_tx);
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        canceller.cancel();
    });

    let result = supervisor.execute(Arc::clone(&handle), cancel).await;
    assert_eq!(result.expect("outcome"), TerminalOutcome::Cancelled);

    let task = handle.lock().await.clone();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(kill_flag.load(std::sync::atomic::Ordering::SeqCst));
}
