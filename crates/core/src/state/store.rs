//! In-memory task registry.
//!
//! The engine does not own durable persistence; the store is its live view
//! of task records, indexed by id. Each record sits behind its own lock so
//! one task's supervisor never contends with another's.

use sq_protocol::task_models::{Task, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared handle to one task record.
pub type TaskHandle = Arc<Mutex<Task>>;

/// Registry of all known tasks, indexed by their UUID.
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<Mutex<HashMap<Uuid, TaskHandle>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task and return its shared handle.
    pub async fn insert(&self, task: Task) -> TaskHandle {
        let id = task.id;
        let handle = Arc::new(Mutex::new(task));
        self.tasks.lock().await.insert(id, Arc::clone(&handle));
        handle
    }

    /// Look up a task by id.
    pub async fn get(&self, id: Uuid) -> Option<TaskHandle> {
        self.tasks.lock().await.get(&id).cloned()
    }

    /// Remove a task from the registry, returning its handle if present.
    pub async fn remove(&self, id: Uuid) -> Option<TaskHandle> {
        self.tasks.lock().await.remove(&id)
    }

    /// Clone of the current state of one task.
    pub async fn snapshot(&self, id: Uuid) -> Option<Task> {
        let handle = self.get(id).await?;
        let task = handle.lock().await;
        Some(task.clone())
    }

    /// Clones of all task records.
    pub async fn all(&self) -> Vec<Task> {
        let handles: Vec<TaskHandle> = self.tasks.lock().await.values().cloned().collect();
        let mut result = Vec::with_capacity(handles.len());
        for handle in handles {
            result.push(handle.lock().await.clone());
        }
        result
    }

    /// Number of tasks currently in the given status.
    pub async fn count_in_status(&self, status: TaskStatus) -> usize {
        self.all().await.iter().filter(|t| t.status == status).count()
    }

    /// Total number of registered tasks.
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}
