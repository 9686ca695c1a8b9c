//! Test fixtures for engine integration tests.

use sq_core::dispatcher::Dispatcher;
use sq_core::solver::Solver;
use sq_core::state::store::TaskStore;
use sq_protocol::config_models::EngineConfig;
use sq_protocol::ipc::Event;
use sq_protocol::task_models::{Priority, Task, TaskStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Build an engine configuration rooted in a (temp) directory, with the
/// uploads/results/logs directories created.
#[allow(dead_code)]
pub fn test_config(root: &Path) -> EngineConfig {
    let config = EngineConfig {
        results_dir: root.join("results"),
        logs_dir: root.join("logs"),
        max_concurrent_tasks: 2,
        ..EngineConfig::default()
    };
    std::fs::create_dir_all(&config.results_dir).expect("create results dir");
    std::fs::create_dir_all(&config.logs_dir).expect("create logs dir");
    std::fs::create_dir_all(root.join("uploads")).expect("create uploads dir");
    config
}

/// Create a pending task whose input artifact exists on disk.
#[allow(dead_code)]
pub fn make_task(root: &Path, config: &EngineConfig, name: &str, priority: Priority) -> Task {
    let unique = format!("{name}_20250101_120000_ab12cd34.mph");
    let input_path = root.join("uploads").join(&unique);
    std::fs::write(&input_path, b"model data").expect("write input artifact");
    let output_path = config
        .results_dir
        .join(format!("{name}_20250101_120000_ab12cd34_solved.mph"));
    Task::new(
        Uuid::new_v4(),
        format!("{name}.mph"),
        unique,
        input_path,
        output_path,
        priority,
    )
}

/// Wire a dispatcher over a fresh store, returning it with the event probe.
#[allow(dead_code)]
pub fn engine(
    config: EngineConfig,
    solver: Arc<dyn Solver>,
) -> (Dispatcher, mpsc::Receiver<Event>) {
    let (events_tx, events_rx) = mpsc::channel(1024);
    let dispatcher = Dispatcher::new(TaskStore::new(), solver, Arc::new(config), events_tx);
    (dispatcher, events_rx)
}

/// Poll the store until the task reaches `status`, or panic after 5s.
#[allow(dead_code)]
pub async fn wait_for_status(store: &TaskStore, id: Uuid, status: TaskStatus) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(task) = store.snapshot(id).await {
            if task.status == status {
                return task;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} never reached {status}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll the store until the task is terminal, or panic after 5s.
#[allow(dead_code)]
pub async fn wait_for_terminal(store: &TaskStore, id: Uuid) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(task) = store.snapshot(id).await {
            if task.is_finished() {
                return task;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} never reached a terminal state"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Drain every event currently buffered on the probe.
#[allow(dead_code)]
pub fn drain_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
