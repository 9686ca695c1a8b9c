//! Engine messaging protocol.
//!
//! This module defines the message types for asynchronous communication
//! between the request-handling layer (CLI, web front end) and the engine.
//!
//! The protocol follows an Operation/Event pattern:
//! - `Op`: Commands sent from the caller to the engine
//! - `Event`: Status updates sent from the engine to the caller
//!
//! Communication is asynchronous and channel-based; the engine never blocks
//! on a slow or absent consumer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::task_models::Priority;

/// Operations sent from the caller to the engine.
///
/// These represent user commands. The engine processes each operation and
/// reports the outcome through Events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Op {
    /// Submit a task for execution.
    ///
    /// The task record must already exist in `Pending` state; the engine
    /// either grants a slot immediately or enqueues the task under its
    /// priority tier.
    SubmitTask {
        task_id: Uuid,
        input_path: PathBuf,
        output_path: PathBuf,
        priority: Priority,
    },

    /// Cancel a task.
    ///
    /// Rejected when the task has already reached a terminal state.
    CancelTask { task_id: Uuid },

    /// Delete a task: cancel it if still active, then remove its artifacts.
    DeleteTask { task_id: Uuid },
}

/// Events sent from the engine to the caller.
///
/// These represent task state changes and live progress that the display
/// layer should reflect to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// The task was granted an execution slot.
    TaskQueued { task_id: Uuid },

    /// The solver process has been started for the task.
    TaskStarted { task_id: Uuid },

    /// The task's high-water-mark progress advanced.
    TaskProgress {
        task_id: Uuid,
        percentage: f64,
        step: Option<String>,
    },

    /// The solver emitted a new output line.
    ///
    /// The display layer should append this to the task's log view.
    TaskLogChunk { task_id: Uuid, content: String },

    /// The task completed and left a result artifact.
    TaskCompleted {
        task_id: Uuid,
        result_filename: String,
    },

    /// The task failed; `error` carries the extracted reason.
    TaskFailed { task_id: Uuid, error: String },

    /// The task was cancelled.
    TaskCancelled { task_id: Uuid },
}
