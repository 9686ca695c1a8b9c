//! Task dispatching under a priority and concurrency policy.
//!
//! The `Dispatcher` is the central coordinator for all task executions. It
//! holds the process-wide slot budget, two strict-FIFO queues (high first,
//! then normal — two ordered lists with an explicit preference rule, not a
//! comparator heap), and a registry of running supervisors so cancellation
//! can reach an in-flight process.
//!
//! The slot counter only ever changes inside the queue mutex: granted on
//! the two dispatch paths (`submit`, `try_dispatch_locked`), released in
//! `release_slot` and on an aborted launch. No other flow touches it.

use crate::cleanup;
use crate::solver::Solver;
use crate::state::store::{TaskHandle, TaskStore};
use crate::state::task::{mark_cancelled, mark_queued, TransitionError};
use crate::supervisor::{Supervisor, TerminalOutcome};
use sq_protocol::config_models::EngineConfig;
use sq_protocol::ipc::{Event, Op};
use sq_protocol::task_models::{Priority, Task, TaskStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pause before re-dispatching a slot freed by cancellation, so the next
/// task does not claim a license seat the dying process has not released.
const SLOT_RECLAIM_DELAY: Duration = Duration::from_millis(500);

/// Errors surfaced by dispatcher entry points.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("task {task_id} cannot be cancelled in state {status}")]
    NotCancellable { task_id: Uuid, status: TaskStatus },

    #[error("failed to read task log: {0}")]
    LogRead(std::io::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

struct SlotState {
    high: VecDeque<Uuid>,
    normal: VecDeque<Uuid>,
    slots_in_use: usize,
}

struct DispatcherInner {
    store: TaskStore,
    solver: Arc<dyn Solver>,
    config: Arc<EngineConfig>,
    events_tx: Sender<Event>,
    queues: Mutex<SlotState>,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
}

/// Coordinates all task executions. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        store: TaskStore,
        solver: Arc<dyn Solver>,
        config: Arc<EngineConfig>,
        events_tx: Sender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                solver,
                config,
                events_tx,
                queues: Mutex::new(SlotState {
                    high: VecDeque::new(),
                    normal: VecDeque::new(),
                    slots_in_use: 0,
                }),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The task registry this dispatcher works against.
    pub fn store(&self) -> &TaskStore {
        &self.inner.store
    }

    /// Accept a dispatch request for an existing pending task.
    ///
    /// Grants a slot immediately when one is free; otherwise the task is
    /// enqueued under its priority tier and stays `pending` until a slot
    /// frees. Redelivery of an already-dispatched task is a no-op, so an
    /// at-least-once trigger upstream stays safe.
    pub async fn submit(&self, task_id: Uuid) -> Result<(), DispatchError> {
        let handle = self
            .inner
            .store
            .get(task_id)
            .await
            .ok_or(DispatchError::TaskNotFound(task_id))?;

        let mut q = self.inner.queues.lock().await;
        let (priority, status) = {
            let t = handle.lock().await;
            (t.priority, t.status)
        };
        if status != TaskStatus::Pending {
            tracing::warn!(%task_id, %status, "ignoring dispatch of non-pending task");
            return Ok(());
        }

        if q.slots_in_use < self.inner.config.max_concurrent_tasks {
            q.slots_in_use += 1;
            self.launch_locked(task_id, handle, &mut q).await;
        } else {
            match priority {
                Priority::High => q.high.push_back(task_id),
                Priority::Normal => q.normal.push_back(task_id),
            }
            tracing::info!(%task_id, %priority, "all slots busy, task enqueued");
        }
        Ok(())
    }

    /// Cancel a task.
    ///
    /// The state-machine transition is synchronous; killing the process
    /// tree is cooperative and best-effort through the supervisor's
    /// cancellation token. A dangling process is an acceptable transient,
    /// an inconsistent task status is not.
    pub async fn cancel(&self, task_id: Uuid) -> Result<(), DispatchError> {
        let handle = self
            .inner
            .store
            .get(task_id)
            .await
            .ok_or(DispatchError::TaskNotFound(task_id))?;

        let mut t = handle.lock().await;
        if !t.can_be_cancelled() {
            return Err(DispatchError::NotCancellable {
                task_id,
                status: t.status,
            });
        }
        if let Some(token) = self.inner.running.lock().await.get(&task_id) {
            token.cancel();
        }
        mark_cancelled(&mut t, &self.inner.events_tx).await?;
        tracing::info!(%task_id, "task cancelled");
        Ok(())
    }

    /// Delete a task: cancel it if still active, remove its artifacts,
    /// and drop it from the registry. Returns the final record so the
    /// caller can safely remove its persisted counterpart.
    pub async fn delete(&self, task_id: Uuid) -> Result<Task, DispatchError> {
        match self.cancel(task_id).await {
            Ok(()) | Err(DispatchError::NotCancellable { .. }) => {}
            Err(e) => return Err(e),
        }

        let handle = self
            .inner
            .store
            .remove(task_id)
            .await
            .ok_or(DispatchError::TaskNotFound(task_id))?;
        let task = handle.lock().await.clone();
        cleanup::cleanup_files(&task, &self.inner.config);
        tracing::info!(%task_id, "task deleted");
        Ok(task)
    }

    /// Read the accumulated log text of a task.
    pub async fn task_log(&self, task_id: Uuid) -> Result<String, DispatchError> {
        let handle = self
            .inner
            .store
            .get(task_id)
            .await
            .ok_or(DispatchError::TaskNotFound(task_id))?;
        let log_filename = handle.lock().await.log_filename.clone();
        let Some(name) = log_filename else {
            return Ok(String::new());
        };
        tokio::fs::read_to_string(self.inner.config.logs_dir.join(name))
            .await
            .map_err(DispatchError::LogRead)
    }

    /// Dispatch an incoming protocol operation.
    ///
    /// The task record is authoritative for paths and priority; the fields
    /// carried by `SubmitTask` exist for the transport's benefit.
    pub async fn handle_op(&self, op: Op) -> Result<(), DispatchError> {
        match op {
            Op::SubmitTask { task_id, .. } => self.submit(task_id).await,
            Op::CancelTask { task_id } => self.cancel(task_id).await,
            Op::DeleteTask { task_id } => self.delete(task_id).await.map(|_| ()),
        }
    }

    /// Grant-side of the slot budget. Caller holds the queue lock and has
    /// already incremented `slots_in_use` for this task.
    fn launch_locked<'a>(
        &'a self,
        task_id: Uuid,
        handle: TaskHandle,
        q: &'a mut SlotState,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        // Boxed (rather than an `async fn`) to break the mutually-recursive
        // async cycle with `try_dispatch_locked`, which would otherwise be an
        // infinitely-sized future the compiler cannot prove `Send`.
        Box::pin(async move {
        {
            let mut t = handle.lock().await;
            if let Err(e) = mark_queued(&mut t, &self.inner.events_tx).await {
                // Cancelled between selection and dispatch; hand the slot back.
                tracing::debug!(%task_id, error = %e, "dispatch aborted");
                q.slots_in_use -= 1;
                return;
            }
        }

        let cancel = CancellationToken::new();
        self.inner
            .running
            .lock()
            .await
            .insert(task_id, cancel.clone());

        let this = self.clone();
        tokio::spawn(async move {
            let supervisor = Supervisor::new(
                Arc::clone(&this.inner.solver),
                Arc::clone(&this.inner.config),
                this.inner.events_tx.clone(),
            );
            let outcome = supervisor.execute(handle, cancel).await;
            this.inner.running.lock().await.remove(&task_id);

            let reclaim_delay = match &outcome {
                Ok(TerminalOutcome::Cancelled | TerminalOutcome::TimedOut) => {
                    Some(SLOT_RECLAIM_DELAY)
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "supervisor internal failure");
                    None
                }
            };
            if let Some(delay) = reclaim_delay {
                tokio::time::sleep(delay).await;
            }
            this.release_slot().await;
        });
        })
    }

    /// Release-side of the slot budget, then pull the next eligible task.
    async fn release_slot(&self) {
        let mut q = self.inner.queues.lock().await;
        q.slots_in_use = q.slots_in_use.saturating_sub(1);
        self.try_dispatch_locked(&mut q).await;
    }

    /// Fill free slots from the queues: high tier drained first, strict
    /// FIFO within a tier. Entries cancelled while waiting are skipped.
    async fn try_dispatch_locked(&self, q: &mut SlotState) {
        while q.slots_in_use < self.inner.config.max_concurrent_tasks {
            let Some(task_id) = pop_next(q) else {
                break;
            };
            let Some(handle) = self.inner.store.get(task_id).await else {
                continue;
            };
            let pending = handle.lock().await.status == TaskStatus::Pending;
            if !pending {
                continue;
            }
            q.slots_in_use += 1;
            self.launch_locked(task_id, handle, q).await;
        }
    }
}

fn pop_next(q: &mut SlotState) -> Option<Uuid> {
    q.high.pop_front().or_else(|| q.normal.pop_front())
}
