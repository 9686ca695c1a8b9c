//! Task state machine implementation.
//!
//! This module provides the transition functions for a task's lifecycle.
//! They are the only legal way to mutate a task's status, timestamps, and
//! derived durations; each successful transition emits the matching event.
//!
//! The state graph:
//!
//! ```text
//! pending -> queued -> running -> {completed | failed | cancelled}
//! ```
//!
//! `failed` is additionally reachable from any non-terminal state (launch
//! failures happen before `running`), and `cancelled` from pending, queued,
//! or running. No transition leaves a terminal state, and no transition can
//! succeed twice in sequence: a call made outside its allowed source states
//! fails without mutating any field.

use chrono::{DateTime, Utc};
use sq_protocol::ipc::Event;
use sq_protocol::task_models::{Task, TaskStatus};
use thiserror::Error;
use tokio::sync::mpsc::Sender;

/// A rejected state transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot transition task from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("progress updates require a running task, status is {status}")]
    NotRunning { status: TaskStatus },
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

/// Transition pending -> queued and record the queue wait.
///
/// Sets the queued timestamp and computes `queue_time` from creation.
pub async fn mark_queued(task: &mut Task, events_tx: &Sender<Event>) -> Result<(), TransitionError> {
    if task.status != TaskStatus::Pending {
        return Err(TransitionError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Queued,
        });
    }
    let now = Utc::now();
    task.status = TaskStatus::Queued;
    task.queued_at = Some(now);
    task.queue_time = Some(seconds_between(task.created_at, now));
    let _ = events_tx.send(Event::TaskQueued { task_id: task.id }).await;
    Ok(())
}

/// Transition queued -> running and record the start timestamp.
pub async fn mark_started(
    task: &mut Task,
    events_tx: &Sender<Event>,
) -> Result<(), TransitionError> {
    if task.status != TaskStatus::Queued {
        return Err(TransitionError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Running,
        });
    }
    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());
    let _ = events_tx.send(Event::TaskStarted { task_id: task.id }).await;
    Ok(())
}

/// Advance the high-water-mark progress of a running task.
///
/// A percentage at or below the last recorded value is silently dropped
/// (still `Ok`): out-of-order or duplicate output chunks must never make
/// the displayed progress regress. Values above 100 are clamped.
pub async fn update_progress(
    task: &mut Task,
    percentage: f64,
    step: Option<String>,
    events_tx: &Sender<Event>,
) -> Result<(), TransitionError> {
    if task.status != TaskStatus::Running {
        return Err(TransitionError::NotRunning {
            status: task.status,
        });
    }
    let percentage = percentage.min(100.0);
    if percentage <= task.progress_percentage {
        return Ok(());
    }
    task.progress_percentage = percentage;
    if step.is_some() {
        task.current_step = step.clone();
    }
    let _ = events_tx
        .send(Event::TaskProgress {
            task_id: task.id,
            percentage,
            step,
        })
        .await;
    Ok(())
}

/// Transition running -> completed.
///
/// Forces progress to 100.0, records the result artifact name, and
/// computes `execution_time`.
pub async fn mark_completed(
    task: &mut Task,
    result_filename: String,
    events_tx: &Sender<Event>,
) -> Result<(), TransitionError> {
    if task.status != TaskStatus::Running {
        return Err(TransitionError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Completed,
        });
    }
    let now = Utc::now();
    task.status = TaskStatus::Completed;
    task.completed_at = Some(now);
    task.progress_percentage = 100.0;
    task.result_filename = Some(result_filename.clone());
    task.solver_pid = None;
    if let Some(started) = task.started_at {
        task.execution_time = Some(seconds_between(started, now));
    }
    let _ = events_tx
        .send(Event::TaskCompleted {
            task_id: task.id,
            result_filename,
        })
        .await;
    Ok(())
}

/// Transition any non-terminal state -> failed.
///
/// Reachable before `running` to cover launch-time failures. Computes
/// `execution_time` only when a start timestamp exists.
pub async fn mark_failed(
    task: &mut Task,
    message: String,
    detail: Option<String>,
    events_tx: &Sender<Event>,
) -> Result<(), TransitionError> {
    if task.status.is_terminal() {
        return Err(TransitionError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Failed,
        });
    }
    let now = Utc::now();
    task.status = TaskStatus::Failed;
    task.completed_at = Some(now);
    task.error_message = Some(message.clone());
    task.error_log = detail;
    task.solver_pid = None;
    if let Some(started) = task.started_at {
        task.execution_time = Some(seconds_between(started, now));
    }
    let _ = events_tx
        .send(Event::TaskFailed {
            task_id: task.id,
            error: message,
        })
        .await;
    Ok(())
}

/// Transition pending, queued, or running -> cancelled.
pub async fn mark_cancelled(
    task: &mut Task,
    events_tx: &Sender<Event>,
) -> Result<(), TransitionError> {
    if !task.can_be_cancelled() {
        return Err(TransitionError::InvalidTransition {
            from: task.status,
            to: TaskStatus::Cancelled,
        });
    }
    let now = Utc::now();
    task.status = TaskStatus::Cancelled;
    task.completed_at = Some(now);
    task.solver_pid = None;
    if let Some(started) = task.started_at {
        task.execution_time = Some(seconds_between(started, now));
    }
    let _ = events_tx
        .send(Event::TaskCancelled { task_id: task.id })
        .await;
    Ok(())
}
